pub mod change;
pub mod history;
pub mod notify;
pub(crate) mod pipeline;
pub mod stats;
pub mod transport;
pub mod types;
pub mod upstream;
pub mod validator;
