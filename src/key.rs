//! Keys of the world-state key space and their canonical nibble encoding.
//!
//! Ключ — тройка (path, kind, storage_path). В slotted-хранилище ключ
//! кодируется единым ниббл-путём с ведущим тег-нибблом:
//!   [tag][account path][storage path]
//! tag: 0 — Account, 1 — StorageCell, 2 — Merkle (state),
//!      3 — Merkle под storage-деревом.
//! Кодировка каноническая: одинаковый логический ключ всегда даёт один и
//! тот же путь с одним и тем же выравниванием.

use primitive_types::H256;

use crate::nibble::{NibblePath, NibblePathBuf};

const TAG_ACCOUNT: u8 = 0x0;
const TAG_STORAGE: u8 = 0x1;
const TAG_MERKLE: u8 = 0x2;
const TAG_MERKLE_STORAGE: u8 = 0x3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Account,
    StorageCell,
    Merkle,
}

/// Собрать закодированный ключ из произвольных путей.
pub fn encode(kind: KeyKind, path: &NibblePath<'_>, storage_path: &NibblePath<'_>) -> NibblePathBuf {
    let tag = match kind {
        KeyKind::Account => TAG_ACCOUNT,
        KeyKind::StorageCell => TAG_STORAGE,
        KeyKind::Merkle => {
            if storage_path.is_empty() {
                TAG_MERKLE
            } else {
                TAG_MERKLE_STORAGE
            }
        }
    };
    let mut out = NibblePathBuf::with_capacity(1 + path.len() + storage_path.len());
    out.push(tag);
    out.push_path(path);
    out.push_path(storage_path);
    out
}

/// Ключ аккаунта по 32-байтовому адресу.
pub fn account_key(address: &H256) -> NibblePathBuf {
    encode(
        KeyKind::Account,
        &NibblePath::from_key_bytes(address.as_bytes()),
        &NibblePath::EMPTY,
    )
}

/// Ключ storage-ячейки (address, slot).
pub fn storage_key(address: &H256, slot: &H256) -> NibblePathBuf {
    encode(
        KeyKind::StorageCell,
        &NibblePath::from_key_bytes(address.as_bytes()),
        &NibblePath::from_key_bytes(slot.as_bytes()),
    )
}

/// Merkle-ключ state-дерева (пустой путь — корень).
pub fn merkle_key(path: &NibblePath<'_>) -> NibblePathBuf {
    encode(KeyKind::Merkle, path, &NibblePath::EMPTY)
}

/// Merkle-ключ под storage-деревом аккаунта.
pub fn storage_merkle_key(address: &H256, storage_path: &NibblePath<'_>) -> NibblePathBuf {
    encode(
        KeyKind::Merkle,
        &NibblePath::from_key_bytes(address.as_bytes()),
        storage_path,
    )
}

/// Префикс всех записей аккаунта (его storage-дерево).
pub fn storage_prefix(address: &H256) -> NibblePathBuf {
    let mut out = NibblePathBuf::with_capacity(65);
    out.push(TAG_STORAGE);
    out.push_path(&NibblePath::from_key_bytes(address.as_bytes()));
    out
}
