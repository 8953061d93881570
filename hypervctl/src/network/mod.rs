//! Network adapters and virtual switches.

mod adapter;
mod switch;

pub use adapter::BandwidthLimit;
pub use switch::{SwitchType, VirtualSwitch};
