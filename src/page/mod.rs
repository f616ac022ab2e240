//! Pages: fixed 4096-byte units with a common 8-byte header.
//!
//! Header (LE): [batch_id u32][version u8 = 1][page_type u8][level u8][metadata u8]
//!
//! Страница принадлежит батчу, чей id записан в заголовке; писать в неё
//! можно только когда header.batch_id == id текущего write-батча — иначе
//! сначала copy-on-write (см. store::batch).

pub mod abandoned;
pub mod data;
pub mod root;

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    PAGE_HDR_SIZE, PAGE_SIZE, PAGE_TYPE_ABANDONED, PAGE_TYPE_BOTTOM, PAGE_TYPE_DATA,
    PAGE_TYPE_LEAF_OVERFLOW, PAGE_TYPE_ROOT, PAGE_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub batch_id: u32,
    pub version: u8,
    pub page_type: u8,
    pub level: u8,
    pub metadata: u8,
}

pub fn page_header_read(buf: &[u8]) -> Result<PageHeader> {
    if buf.len() < PAGE_HDR_SIZE {
        return Err(anyhow!("page buffer too small for header"));
    }
    let h = PageHeader {
        batch_id: LittleEndian::read_u32(&buf[0..4]),
        version: buf[4],
        page_type: buf[5],
        level: buf[6],
        metadata: buf[7],
    };
    if h.version != PAGE_VERSION {
        return Err(anyhow!(
            "unsupported page version {} (expected {})",
            h.version,
            PAGE_VERSION
        ));
    }
    match h.page_type {
        PAGE_TYPE_ROOT | PAGE_TYPE_ABANDONED | PAGE_TYPE_DATA | PAGE_TYPE_BOTTOM
        | PAGE_TYPE_LEAF_OVERFLOW => Ok(h),
        t => Err(anyhow!("unknown page type {}", t)),
    }
}

pub fn page_header_write(buf: &mut [u8], h: &PageHeader) {
    debug_assert!(buf.len() >= PAGE_HDR_SIZE);
    LittleEndian::write_u32(&mut buf[0..4], h.batch_id);
    buf[4] = h.version;
    buf[5] = h.page_type;
    buf[6] = h.level;
    buf[7] = h.metadata;
}

#[inline]
pub fn page_batch_id(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(&buf[0..4])
}

#[inline]
pub fn set_page_batch_id(buf: &mut [u8], batch_id: u32) {
    LittleEndian::write_u32(&mut buf[0..4], batch_id);
}

#[inline]
pub fn page_type(buf: &[u8]) -> u8 {
    buf[5]
}

/// Проинициализировать страницу заданного типа поверх произвольного мусора.
pub fn page_init(buf: &mut [u8], batch_id: u32, ptype: u8, level: u8, metadata: u8) {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    for b in buf.iter_mut() {
        *b = 0;
    }
    page_header_write(
        buf,
        &PageHeader {
            batch_id,
            version: PAGE_VERSION,
            page_type: ptype,
            level,
            metadata,
        },
    );
}
