//! Validator council
//!
//! A second opinion layer for opening trades. Each member reviews the
//! decision from its own perspective and the weighted vote decides whether
//! the order may be placed.

pub mod prompts;
pub mod review;
pub mod types;

pub use prompts::{PromptTemplates, TemplateEngine};
pub use review::ValidatorCouncil;
pub use types::{
    ConsensusResult, CouncilConfig, CouncilMemberConfig, ValidatorRole, ValidatorSetup,
    ValidatorVerdict, Verdict,
};
