//! # pulse-session
//!
//! Everything one measurement session owns:
//!
//! - [`SessionBuffer`]: FIFO-capped rolling window of decoded frames
//! - [`SessionController`]: the `Idle → Calibrating → Measuring → Errored`
//!   state machine that drives decode, buffering, cadence, and estimation
//! - [`RunInterrupt`]: lets `start`/`stop` cut an in-flight estimate short
//!
//! A controller is exclusively owned by one task and processes one command at
//! a time; nothing here is shared between sessions except the decoder and
//! estimator handed in at construction.

#![deny(unsafe_code)]

pub mod buffer;
pub mod controller;
pub mod interrupt;
pub mod metrics;
pub mod state;

pub use buffer::SessionBuffer;
pub use controller::SessionController;
pub use interrupt::RunInterrupt;
pub use state::SessionState;
