#![allow(non_snake_case)]

// Базовые модули
pub mod account;
pub mod config;
pub mod consts;
pub mod hash;
pub mod key;
pub mod lock;
pub mod metrics;

// Структуры данных
pub mod nibble; // src/nibble/mod.rs — ниббл-пути
pub mod slotted; // src/slotted/mod.rs — in-page карта

// Страницы и paged store
pub mod page; // src/page/{mod,root,abandoned,data}.rs
pub mod pool;
pub mod store; // src/store/{mod,batch}.rs

// Blockchain overlay
pub mod chain; // src/chain/{mod,bloom}.rs

// Удобные реэкспорты
pub use account::Account;
pub use chain::{Blockchain, PendingBlock};
pub use config::PaprikaConfig;
pub use nibble::{NibblePath, NibblePathBuf};
pub use store::{CommitOptions, PagedDb, ReadBatch, WriteBatch};

pub use primitive_types::{H256, U256};
