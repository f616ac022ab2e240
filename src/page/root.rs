//! Root pages and the root ring.
//!
//! Страницы 0..R-1 (R = max_reorg_depth) образуют кольцо корней; слот для
//! батча b — b mod R. Payload (после общего заголовка, LE):
//!   [block_number u32]
//!   [block_hash 32 B]
//!   [tree_root u32]      -- адрес корня дерева (ADDR_NULL = пустое дерево)
//!   [page_count u32]     -- watermark числа занятых страниц файла
//!   [abandoned_count u32]
//!   [(batch_id u32, head u32) x 32] -- головы abandoned-цепочек недавних батчей
//!   [crc32 u32]
//!
//! CRC считается crc32fast-ом по всей странице с обнулённым полем CRC
//! (включая заголовок) — рваная запись корня отбрасывается при открытии.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use primitive_types::H256;

use crate::consts::{
    ADDR_NULL, MAX_REORG_DEPTH_LIMIT, PAGE_SIZE, PAGE_TYPE_ROOT, ROOT_ABANDONED_ENTRY_SIZE,
    ROOT_OFF_ABANDONED, ROOT_OFF_ABANDONED_COUNT, ROOT_OFF_BLOCK_HASH, ROOT_OFF_BLOCK_NUMBER,
    ROOT_OFF_CRC, ROOT_OFF_PAGE_COUNT, ROOT_OFF_TREE_ROOT, PAGE_VERSION,
};
use crate::page::{page_header_write, page_type, PageHeader};

/// In-memory копия корневого состояния; живёт в батчах и снапшотах.
#[derive(Debug, Clone)]
pub struct RootSnapshot {
    pub batch_id: u32,
    pub block_number: u32,
    pub block_hash: H256,
    pub tree_root: u32,
    pub page_count: u32,
    /// Головы abandoned-цепочек недавних батчей: (batch_id, head).
    pub abandoned: Vec<(u32, u32)>,
}

impl RootSnapshot {
    /// Свежая БД: занято только root-кольцо.
    pub fn genesis(ring_len: u32) -> Self {
        Self {
            batch_id: 0,
            block_number: 0,
            block_hash: H256::zero(),
            tree_root: ADDR_NULL,
            page_count: ring_len,
            abandoned: Vec::new(),
        }
    }
}

fn page_crc(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..ROOT_OFF_CRC]);
    hasher.update(&[0, 0, 0, 0]);
    hasher.update(&buf[ROOT_OFF_CRC + 4..]);
    hasher.finalize()
}

/// Записать снапшот в root-страницу и проставить CRC.
pub fn root_page_write(buf: &mut [u8], snap: &RootSnapshot) -> Result<()> {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    if snap.abandoned.len() > MAX_REORG_DEPTH_LIMIT as usize {
        return Err(anyhow!(
            "abandoned table overflow: {} entries (max {})",
            snap.abandoned.len(),
            MAX_REORG_DEPTH_LIMIT
        ));
    }
    for b in buf.iter_mut() {
        *b = 0;
    }
    page_header_write(
        buf,
        &PageHeader {
            batch_id: snap.batch_id,
            version: PAGE_VERSION,
            page_type: PAGE_TYPE_ROOT,
            level: 0,
            metadata: 0,
        },
    );
    LittleEndian::write_u32(
        &mut buf[ROOT_OFF_BLOCK_NUMBER..ROOT_OFF_BLOCK_NUMBER + 4],
        snap.block_number,
    );
    buf[ROOT_OFF_BLOCK_HASH..ROOT_OFF_BLOCK_HASH + 32].copy_from_slice(snap.block_hash.as_bytes());
    LittleEndian::write_u32(&mut buf[ROOT_OFF_TREE_ROOT..ROOT_OFF_TREE_ROOT + 4], snap.tree_root);
    LittleEndian::write_u32(
        &mut buf[ROOT_OFF_PAGE_COUNT..ROOT_OFF_PAGE_COUNT + 4],
        snap.page_count,
    );
    LittleEndian::write_u32(
        &mut buf[ROOT_OFF_ABANDONED_COUNT..ROOT_OFF_ABANDONED_COUNT + 4],
        snap.abandoned.len() as u32,
    );
    for (i, (batch, head)) in snap.abandoned.iter().enumerate() {
        let off = ROOT_OFF_ABANDONED + i * ROOT_ABANDONED_ENTRY_SIZE;
        LittleEndian::write_u32(&mut buf[off..off + 4], *batch);
        LittleEndian::write_u32(&mut buf[off + 4..off + 8], *head);
    }
    let crc = page_crc(buf);
    LittleEndian::write_u32(&mut buf[ROOT_OFF_CRC..ROOT_OFF_CRC + 4], crc);
    Ok(())
}

/// Прочитать root-страницу; Err — тип/CRC не сходятся (рваная запись).
pub fn root_page_read(buf: &[u8]) -> Result<RootSnapshot> {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    if page_type(buf) != PAGE_TYPE_ROOT {
        return Err(anyhow!("not a root page (type={})", page_type(buf)));
    }
    let stored = LittleEndian::read_u32(&buf[ROOT_OFF_CRC..ROOT_OFF_CRC + 4]);
    let calc = page_crc(buf);
    if stored != calc {
        return Err(anyhow!(
            "root page CRC mismatch (stored={:08x}, calc={:08x})",
            stored,
            calc
        ));
    }
    let count = LittleEndian::read_u32(&buf[ROOT_OFF_ABANDONED_COUNT..ROOT_OFF_ABANDONED_COUNT + 4]);
    if count > MAX_REORG_DEPTH_LIMIT {
        return Err(anyhow!("root page abandoned_count {} out of range", count));
    }
    let mut abandoned = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let off = ROOT_OFF_ABANDONED + i * ROOT_ABANDONED_ENTRY_SIZE;
        abandoned.push((
            LittleEndian::read_u32(&buf[off..off + 4]),
            LittleEndian::read_u32(&buf[off + 4..off + 8]),
        ));
    }
    Ok(RootSnapshot {
        batch_id: LittleEndian::read_u32(&buf[0..4]),
        block_number: LittleEndian::read_u32(&buf[ROOT_OFF_BLOCK_NUMBER..ROOT_OFF_BLOCK_NUMBER + 4]),
        block_hash: H256::from_slice(&buf[ROOT_OFF_BLOCK_HASH..ROOT_OFF_BLOCK_HASH + 32]),
        tree_root: LittleEndian::read_u32(&buf[ROOT_OFF_TREE_ROOT..ROOT_OFF_TREE_ROOT + 4]),
        page_count: LittleEndian::read_u32(&buf[ROOT_OFF_PAGE_COUNT..ROOT_OFF_PAGE_COUNT + 4]),
        abandoned,
    })
}
