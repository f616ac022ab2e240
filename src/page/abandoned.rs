//! Abandoned pages: per-batch lists of freed page addresses.
//!
//! Payload (после общего заголовка, LE):
//!   [next u32]   -- следующая страница цепочки (ADDR_NULL — конец)
//!   [count u32]  -- число адресов на этой странице
//!   [page_id u32 x AB_CAPACITY]
//!
//! Адреса, освобождённые батчем b, попадают в цепочку батча b и становятся
//! переиспользуемыми, только когда current_batch - b > max_reorg_depth.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{AB_CAPACITY, AB_OFF_COUNT, AB_OFF_IDS, AB_OFF_NEXT, ADDR_SIZE, PAGE_TYPE_ABANDONED};
use crate::page::page_init;

/// Инициализировать пустую abandoned-страницу с хвостом `next`.
pub fn ab_init(buf: &mut [u8], batch_id: u32, next: u32) {
    page_init(buf, batch_id, PAGE_TYPE_ABANDONED, 0, 0);
    LittleEndian::write_u32(&mut buf[AB_OFF_NEXT..AB_OFF_NEXT + 4], next);
}

#[inline]
pub fn ab_next(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(&buf[AB_OFF_NEXT..AB_OFF_NEXT + 4])
}

#[inline]
pub fn ab_count(buf: &[u8]) -> usize {
    LittleEndian::read_u32(&buf[AB_OFF_COUNT..AB_OFF_COUNT + 4]) as usize
}

/// Добавить адрес; false — страница полна.
pub fn ab_push(buf: &mut [u8], addr: u32) -> bool {
    let count = ab_count(buf);
    if count >= AB_CAPACITY {
        return false;
    }
    let off = AB_OFF_IDS + count * ADDR_SIZE;
    LittleEndian::write_u32(&mut buf[off..off + 4], addr);
    LittleEndian::write_u32(&mut buf[AB_OFF_COUNT..AB_OFF_COUNT + 4], (count + 1) as u32);
    true
}

/// Все адреса на странице.
pub fn ab_entries(buf: &[u8]) -> Vec<u32> {
    let count = ab_count(buf);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let off = AB_OFF_IDS + i * ADDR_SIZE;
        out.push(LittleEndian::read_u32(&buf[off..off + 4]));
    }
    out
}
