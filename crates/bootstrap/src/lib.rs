//! Seeds a node's ledger storage from a bootstrap archive.

pub mod archive;
pub mod conf_merge;
pub mod context;
pub mod controller;
pub mod download;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod params;
pub mod replace;

pub use archive::{Authenticity, AuthenticityCheck, UncheckedAuthenticity};
pub use conf_merge::MergeOutcome;
pub use context::BootstrapContext;
pub use controller::{
    BootstrapController, BootstrapEvent, BootstrapMode, BootstrapStatus, ControllerSettings,
    RunPhase, RunState, Stage,
};
pub use download::{HttpTransport, TransferBody, Transport};
pub use error::{BootstrapError, ErrorKind, RunError};
pub use layout::BootstrapLayout;
pub use params::BootstrapParams;
