//! Card collection sub-flow: field formatting, issuer resolution, billing
//! address rules and tokenization.

pub mod address;
pub mod scheme;
pub mod state;
pub mod subflow;

pub use state::{
    CardCollectionStarted, CardCollectionState, CardCommand, CardField, CardFieldId, CardMessage,
};
pub use subflow::{CardCollectionDelegate, CardCollectionSubflow, CardCompletion};
