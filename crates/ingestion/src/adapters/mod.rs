//! Feed 适配器模块
//!
//! 每个适配器负责将特定来源的上游帧转换为 `DecodedFrame`。

pub mod common;
mod envelope;
mod rows;

pub use envelope::EnvelopeAdapter;
pub use rows::RowsAdapter;
