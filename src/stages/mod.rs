pub mod stage0_preprocess;
pub mod stage1_translate;
pub mod stage2_label;
pub mod stage3_patterns;
pub mod stage4_challenge;
pub mod stage4_coaching;
pub mod stage4_key_moments;
pub mod stage4_style;
pub mod stage4_summarize;
pub mod stage5_aggregate;
pub mod stage_legacy;

pub use stage0_preprocess::*;
pub use stage1_translate::*;
pub use stage2_label::*;
pub use stage3_patterns::*;
pub use stage4_challenge::*;
pub use stage4_coaching::*;
pub use stage4_key_moments::*;
pub use stage4_style::*;
pub use stage4_summarize::*;
pub use stage5_aggregate::*;
pub use stage_legacy::*;

// Stage names as registered with the graph
pub const PREPROCESS: &str = "preprocess";
pub const TRANSLATE: &str = "translate_ko_to_en";
pub const LABEL: &str = "label_utterances";
pub const DETECT_PATTERNS: &str = "detect_patterns";
pub const SUMMARIZE: &str = "summarize";
pub const KEY_MOMENTS: &str = "key_moments";
pub const ANALYZE_STYLE: &str = "analyze_style";
pub const COACHING_PLAN: &str = "coaching_plan";
pub const CHALLENGE_EVAL: &str = "challenge_eval";
pub const AGGREGATE: &str = "aggregate_result";
pub const DPICS_ANNOTATE: &str = "dpics_annotate";
pub const HIGHLIGHT_EXTRACT: &str = "highlight_extract";
pub const PARENTING_ADVICE: &str = "parenting_advice";
