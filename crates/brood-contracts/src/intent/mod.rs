mod document;
mod mode;
mod recovery;

pub use document::{
    Checkpoint, IconRelation, IntentBranch, IntentDocument, IntentIcon, INTENT_SCHEMA,
    INTENT_SCHEMA_VERSION, MAX_EVIDENCE_REFS,
};
pub use mode::{
    compare_candidates, rank_candidates, select_mode, ModeCandidate, ModeSelection,
    TransformationMode,
};
pub use recovery::{recover_intent_document, strip_code_fence, ParseFailure, PayloadError};
