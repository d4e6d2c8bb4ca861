//! Delegation directory records and assignee resolution
//!
//! A delegation temporarily redirects one person's approval authority to
//! another. Resolution happens at read time and is never written back onto a
//! step, except for the `delegated_to` audit field once a delegate decides.

pub mod record;
pub mod resolver;

pub use record::{Delegation, DelegationScope, NewDelegation};
pub use resolver::{resolve_assignee, winning_delegation, StepScope};
