//! レジストリストアアクセス

pub mod servers;
