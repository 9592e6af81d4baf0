//! Window processors
//!
//! Includes:
//! - Tumbling time batches ([`TimeBatchWindow`])
//! - Sliding length windows ([`LengthWindow`])
//!
//! Both retain events after forwarding them and implement
//! [`FindableProcessor`](crate::findable::FindableProcessor) so joins can
//! probe what they hold.

pub mod length;
pub mod time_batch;

pub use length::LengthWindow;
pub use time_batch::{TimeBatchConfig, TimeBatchWindow};
