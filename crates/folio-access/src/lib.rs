//! Privilege rules and permission evaluation for Folio.
//!
//! - [`PrivilegeRequirements`] is the contract every rule implementation
//!   satisfies; [`PrivilegeSet`] is the rule-based implementation that ships
//!   with Folio.
//! - [`PermissionEvaluator`] answers cascading view/edit/author questions
//!   and caches record view results per [`UserClass`].

pub mod error;
pub mod evaluator;
pub mod privilege;
pub mod user;

pub use error::{AccessError, AccessResult};
pub use evaluator::{AccessConfig, EvaluatorStats, FieldRules, PermissionEvaluator, SchemaRules};
pub use privilege::{
    Condition, PrivilegeRequirements, PrivilegeSet, RecordView, RuleLogic, TimeRelation,
    UserComparison,
};
pub use user::{User, UserClass};
