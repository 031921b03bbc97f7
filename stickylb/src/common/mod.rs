//! 共通型定義
//!
//! エラー型とバックエンド記述子をまとめる

pub mod error;
pub mod types;
