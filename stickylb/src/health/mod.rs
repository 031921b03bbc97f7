//! ヘルスプローブ集約
//!
//! 全登録サーバーへの並列プローブと最小負荷選択

pub mod prober;

pub use prober::HealthProber;
