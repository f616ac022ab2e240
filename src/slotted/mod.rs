//! Slotted array: in-page map (nibble path -> bytes) over a raw buffer.
//!
//! Layout:
//! - Header (8 bytes): [low u16][high u16][deleted u16][reserved u16]
//! - Slot[] растёт вверх от заголовка, слот = 4 байта:
//!   [raw u16: низшие 13 бит — абсолютное смещение записи, верхние 3 —
//!   преамбула ключа][hash u16]
//! - Записи (payload) растут вниз от конца буфера.
//! - taken = low + high <= data_len - header.
//!
//! Преамбула: bit0 = odd-выравнивание ключа, bits1..2 = класс длины
//! (0: len<4, 1: len==4, 2: len>=5); значение 7 — tombstone.
//!
//! Упаковка ключа в 16-битный hash:
//! - len < 4:  [len:2][n0][n1][n2] — ключ целиком (длина в битах 12..13).
//! - len == 4: [n0][n1][n2][n3] — ключ целиком.
//! - len >= 5: [n0][n1][n(len-2)][n(len-1)] — внешние нибблы; средние
//!   len-4 нибблов пакуются в запись перед значением.
//!
//! Запись: [key_len u8][средние нибблы (только класс >=5)][value].
//! Длина значения выводится из соседства записей по порядку слотов:
//! запись слота i занимает [addr(i), addr(i-1)), addr(-1) = data_len.
//! Tombstone сохраняет смещение, поэтому цепочка соседства не рвётся.
//!
//! Скан по hash идёт по слотам как по последовательности u16 с шагом 2
//! (совпадение валидно только на hash-половине 4-байтового слота) — раскладка
//! дружелюбна к автовекторизации.
//!
//! Удаление: преамбула = tombstone, deleted++, затем жадный сбор tombstone-ов
//! с хвоста (low/high откатываются). Дефрагментация перепаковывает живые
//! записи через scratch-буфер; постусловие deleted == 0.

use byteorder::{ByteOrder, LittleEndian};

use crate::metrics::record_slotted_defrag;
use crate::nibble::{NibblePath, NibblePathBuf};

pub const SA_HDR_SIZE: usize = 8;
pub const SA_SLOT_SIZE: usize = 4;

const OFF_LOW: usize = 0;
const OFF_HIGH: usize = 2;
const OFF_DELETED: usize = 4;

const ADDR_MASK: u16 = 0x1FFF; // 13 бит смещения
const PRE_SHIFT: u16 = 13;

const PRE_DELETED: u8 = 7;

const CLASS_LT4: u8 = 0;
const CLASS_EQ4: u8 = 1;
const CLASS_GE5: u8 = 2;

/// Подготовленный ключ: hash + преамбула + упакованная середина.
#[derive(Debug)]
pub struct KeyParts {
    pub hash: u16,
    pub preamble: u8,
    pub key_len: u8,
    trimmed: [u8; 64],
    trimmed_len: usize,
}

impl KeyParts {
    #[inline]
    pub fn trimmed(&self) -> &[u8] {
        &self.trimmed[..self.trimmed_len]
    }
}

/// Разобрать ключ на (hash, преамбула, середина).
pub fn prepare_key(key: &NibblePath<'_>) -> KeyParts {
    let len = key.len();
    let mut trimmed = [0u8; 64];
    let (hash, class, trimmed_len) = if len < 4 {
        let mut h = (len as u16) << 12;
        for i in 0..len {
            h |= (key.get(i) as u16) << (8 - 4 * i);
        }
        (h, CLASS_LT4, 0)
    } else if len == 4 {
        let h = (key.get(0) as u16) << 12
            | (key.get(1) as u16) << 8
            | (key.get(2) as u16) << 4
            | key.get(3) as u16;
        (h, CLASS_EQ4, 0)
    } else {
        let h = (key.get(0) as u16) << 12
            | (key.get(1) as u16) << 8
            | (key.get(len - 2) as u16) << 4
            | key.get(len - 1) as u16;
        // Средние len-4 нибблов, чётно выровненные, хвост занулён.
        let middle = key.slice_from(2).slice_to(len - 4);
        let n = middle.copy_packed(&mut trimmed);
        (h, CLASS_GE5, n)
    };
    KeyParts {
        hash,
        preamble: (class << 1) | key.odd(),
        key_len: len as u8,
        trimmed,
        trimmed_len,
    }
}

#[inline]
fn read_u16(buf: &[u8], off: usize) -> u16 {
    LittleEndian::read_u16(&buf[off..off + 2])
}

#[inline]
fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    LittleEndian::write_u16(&mut buf[off..off + 2], v);
}

#[inline]
fn slot_raw(buf: &[u8], i: usize) -> u16 {
    read_u16(buf, SA_HDR_SIZE + i * SA_SLOT_SIZE)
}

#[inline]
fn slot_hash(buf: &[u8], i: usize) -> u16 {
    read_u16(buf, SA_HDR_SIZE + i * SA_SLOT_SIZE + 2)
}

#[inline]
fn slot_addr(raw: u16) -> usize {
    (raw & ADDR_MASK) as usize
}

#[inline]
fn slot_preamble(raw: u16) -> u8 {
    (raw >> PRE_SHIFT) as u8
}

#[inline]
fn slot_count(buf: &[u8]) -> usize {
    read_u16(buf, OFF_LOW) as usize / SA_SLOT_SIZE
}

/// Конец записи слота i: начало записи предыдущего слота (addr(-1) = len).
#[inline]
fn record_end(buf: &[u8], i: usize) -> usize {
    if i == 0 {
        buf.len()
    } else {
        slot_addr(slot_raw(buf, i - 1))
    }
}

#[inline]
fn middle_bytes(class: u8, key_len: u8) -> usize {
    if class == CLASS_GE5 {
        (key_len as usize - 4 + 1) / 2
    } else {
        0
    }
}

/// Обнулить заголовок (пустая карта).
pub fn sa_init(buf: &mut [u8]) {
    for b in &mut buf[..SA_HDR_SIZE] {
        *b = 0;
    }
}

/// Число живых записей.
pub fn sa_count(buf: &[u8]) -> usize {
    slot_count(buf) - read_u16(buf, OFF_DELETED) as usize
}

/// Свободные байты (без учёта возможной дефрагментации).
pub fn sa_capacity_left(buf: &[u8]) -> usize {
    let low = read_u16(buf, OFF_LOW) as usize;
    let high = read_u16(buf, OFF_HIGH) as usize;
    buf.len() - SA_HDR_SIZE - low - high
}

/// Срез использования slotted-области (для сплит-эвристик и тестов).
#[derive(Debug, Clone, Copy)]
pub struct SaUsage {
    pub data_len: usize,
    pub low: usize,
    pub high: usize,
    pub deleted: usize,
    pub live: usize,
    pub free: usize,
}

pub fn sa_usage(buf: &[u8]) -> SaUsage {
    let low = read_u16(buf, OFF_LOW) as usize;
    let high = read_u16(buf, OFF_HIGH) as usize;
    let deleted = read_u16(buf, OFF_DELETED) as usize;
    SaUsage {
        data_len: buf.len(),
        low,
        high,
        deleted,
        live: low / SA_SLOT_SIZE - deleted,
        free: buf.len() - SA_HDR_SIZE - low - high,
    }
}

/// Поиск слота по подготовленному ключу. Возвращает (slot, value_range).
fn find(buf: &[u8], parts: &KeyParts) -> Option<(usize, core::ops::Range<usize>)> {
    let slots = slot_count(buf);
    for i in 0..slots {
        if slot_hash(buf, i) != parts.hash {
            continue;
        }
        let raw = slot_raw(buf, i);
        if slot_preamble(raw) != parts.preamble {
            continue;
        }
        let off = slot_addr(raw);
        let end = record_end(buf, i);
        // Запись: [key_len][middle][value]
        if buf[off] != parts.key_len {
            continue;
        }
        let mid = parts.trimmed_len;
        if mid > 0 && &buf[off + 1..off + 1 + mid] != parts.trimmed() {
            continue;
        }
        return Some((i, off + 1 + mid..end));
    }
    None
}

/// Получить значение ключа. Не аллоцирует.
pub fn sa_try_get<'b>(buf: &'b [u8], key: &NibblePath<'_>) -> Option<&'b [u8]> {
    let parts = prepare_key(key);
    find(buf, &parts).map(|(_, r)| &buf[r])
}

/// Вставка/обновление. false — не влезает даже после дефрагментации.
pub fn sa_try_set(buf: &mut [u8], key: &NibblePath<'_>, value: &[u8]) -> bool {
    let parts = prepare_key(key);

    if let Some((idx, range)) = find(buf, &parts) {
        if range.len() == value.len() {
            buf[range].copy_from_slice(value);
            return true;
        }
        sa_delete_at(buf, idx);
    }

    let payload = 1 + parts.trimmed_len + value.len();
    let needed = SA_SLOT_SIZE + payload;

    if sa_capacity_left(buf) < needed {
        if read_u16(buf, OFF_DELETED) > 0 {
            sa_defragment(buf);
        }
        if sa_capacity_left(buf) < needed {
            return false;
        }
    }

    let low = read_u16(buf, OFF_LOW) as usize;
    let high = read_u16(buf, OFF_HIGH) as usize;
    let off = buf.len() - high - payload;
    debug_assert!(off <= ADDR_MASK as usize);

    buf[off] = parts.key_len;
    let mid = parts.trimmed_len;
    buf[off + 1..off + 1 + mid].copy_from_slice(parts.trimmed());
    buf[off + 1 + mid..off + payload].copy_from_slice(value);

    let slot_off = SA_HDR_SIZE + low;
    write_u16(buf, slot_off, off as u16 | (parts.preamble as u16) << PRE_SHIFT);
    write_u16(buf, slot_off + 2, parts.hash);

    write_u16(buf, OFF_LOW, (low + SA_SLOT_SIZE) as u16);
    write_u16(buf, OFF_HIGH, (high + payload) as u16);
    true
}

/// Удаление по ключу. false, если ключа нет (идемпотентно).
pub fn sa_delete(buf: &mut [u8], key: &NibblePath<'_>) -> bool {
    let parts = prepare_key(key);
    match find(buf, &parts) {
        Some((idx, _)) => {
            sa_delete_at(buf, idx);
            true
        }
        None => false,
    }
}

/// Удаление по индексу слота (enumerator-aware путь).
pub fn sa_delete_at(buf: &mut [u8], idx: usize) {
    debug_assert!(idx < slot_count(buf));
    let slot_off = SA_HDR_SIZE + idx * SA_SLOT_SIZE;
    let raw = read_u16(buf, slot_off);
    debug_assert!(slot_preamble(raw) != PRE_DELETED);
    write_u16(
        buf,
        slot_off,
        (raw & ADDR_MASK) | (PRE_DELETED as u16) << PRE_SHIFT,
    );
    let mut deleted = read_u16(buf, OFF_DELETED) + 1;

    // Жадный сбор tombstone-ов с хвоста.
    let mut low = read_u16(buf, OFF_LOW) as usize;
    let mut high = read_u16(buf, OFF_HIGH) as usize;
    loop {
        let slots = low / SA_SLOT_SIZE;
        if slots == 0 {
            break;
        }
        let last = slots - 1;
        let raw = slot_raw(buf, last);
        if slot_preamble(raw) != PRE_DELETED {
            break;
        }
        let payload = record_end(buf, last) - slot_addr(raw);
        low -= SA_SLOT_SIZE;
        high -= payload;
        deleted -= 1;
        write_u16(buf, OFF_LOW, low as u16);
        write_u16(buf, OFF_HIGH, high as u16);
    }
    write_u16(buf, OFF_DELETED, deleted);
}

/// Перепаковать живые записи через scratch. Постусловие: deleted == 0.
pub fn sa_defragment(buf: &mut [u8]) {
    let data_len = buf.len();
    let mut scratch = vec![0u8; data_len];

    let slots = slot_count(buf);
    let mut new_low = 0usize;
    let mut new_high = 0usize;
    for i in 0..slots {
        let raw = slot_raw(buf, i);
        if slot_preamble(raw) == PRE_DELETED {
            continue;
        }
        let off = slot_addr(raw);
        let end = record_end(buf, i);
        let payload = end - off;
        let new_off = data_len - new_high - payload;
        scratch[new_off..new_off + payload].copy_from_slice(&buf[off..end]);

        let slot_off = SA_HDR_SIZE + new_low;
        LittleEndian::write_u16(
            &mut scratch[slot_off..slot_off + 2],
            new_off as u16 | (raw & !ADDR_MASK),
        );
        LittleEndian::write_u16(&mut scratch[slot_off + 2..slot_off + 4], slot_hash(buf, i));
        new_low += SA_SLOT_SIZE;
        new_high += payload;
    }

    LittleEndian::write_u16(&mut scratch[OFF_LOW..OFF_LOW + 2], new_low as u16);
    LittleEndian::write_u16(&mut scratch[OFF_HIGH..OFF_HIGH + 2], new_high as u16);
    // deleted = 0, reserved = 0 — уже нули в scratch.
    buf.copy_from_slice(&scratch);
    record_slotted_defrag();
}

/// Восстановить полный ключ слота из hash/преамбулы/записи.
fn rebuild_key(buf: &[u8], i: usize) -> NibblePathBuf {
    let raw = slot_raw(buf, i);
    let hash = slot_hash(buf, i);
    let class = slot_preamble(raw) >> 1;
    let off = slot_addr(raw);
    let key_len = buf[off] as usize;

    let mut out = NibblePathBuf::with_capacity(key_len);
    match class {
        CLASS_LT4 => {
            debug_assert_eq!(key_len, (hash >> 12) as usize);
            for i in 0..key_len {
                out.push(((hash >> (8 - 4 * i)) & 0xF) as u8);
            }
        }
        CLASS_EQ4 => {
            for shift in [12u16, 8, 4, 0] {
                out.push(((hash >> shift) & 0xF) as u8);
            }
        }
        _ => {
            out.push((hash >> 12) as u8 & 0xF);
            out.push((hash >> 8) as u8 & 0xF);
            let middle = NibblePath::from_bytes(
                &buf[off + 1..off + 1 + middle_bytes(CLASS_GE5, key_len as u8)],
                0,
                key_len - 4,
            );
            out.push_path(&middle);
            out.push((hash >> 4) as u8 & 0xF);
            out.push(hash as u8 & 0xF);
        }
    }
    out
}

/// Первый ниббл ключа слота (None для пустого ключа).
fn slot_first_nibble(buf: &[u8], i: usize) -> Option<u8> {
    let raw = slot_raw(buf, i);
    let hash = slot_hash(buf, i);
    let class = slot_preamble(raw) >> 1;
    match class {
        CLASS_LT4 => {
            if hash >> 12 == 0 {
                None
            } else {
                Some(((hash >> 8) & 0xF) as u8)
            }
        }
        _ => Some((hash >> 12) as u8),
    }
}

/// Живая запись при обходе: индекс слота + восстановленный ключ + значение.
#[derive(Debug)]
pub struct SaEntry {
    pub slot: usize,
    pub key: NibblePathBuf,
    pub value: Vec<u8>,
}

/// Все живые записи в порядке слотов.
pub fn sa_list(buf: &[u8]) -> Vec<SaEntry> {
    let slots = slot_count(buf);
    let mut out = Vec::with_capacity(sa_count(buf));
    for i in 0..slots {
        let raw = slot_raw(buf, i);
        if slot_preamble(raw) == PRE_DELETED {
            continue;
        }
        let off = slot_addr(raw);
        let end = record_end(buf, i);
        let key = rebuild_key(buf, i);
        let mid = middle_bytes(slot_preamble(raw) >> 1, buf[off]);
        out.push(SaEntry {
            slot: i,
            key,
            value: buf[off + 1 + mid..end].to_vec(),
        });
    }
    out
}

/// Живые записи, чей ключ начинается с ниббла `nibble`.
pub fn sa_list_nibble(buf: &[u8], nibble: u8) -> Vec<SaEntry> {
    let slots = slot_count(buf);
    let mut out = Vec::new();
    for i in 0..slots {
        let raw = slot_raw(buf, i);
        if slot_preamble(raw) == PRE_DELETED {
            continue;
        }
        if slot_first_nibble(buf, i) != Some(nibble) {
            continue;
        }
        let off = slot_addr(raw);
        let end = record_end(buf, i);
        let mid = middle_bytes(slot_preamble(raw) >> 1, buf[off]);
        out.push(SaEntry {
            slot: i,
            key: rebuild_key(buf, i),
            value: buf[off + 1 + mid..end].to_vec(),
        });
    }
    out
}

/// Подсчёт живых записей по первому нибблу (ключи длины >= 1).
pub fn sa_first_nibble_stats(buf: &[u8], stats: &mut [u16; 16]) {
    let slots = slot_count(buf);
    for i in 0..slots {
        if slot_preamble(slot_raw(buf, i)) == PRE_DELETED {
            continue;
        }
        if let Some(n) = slot_first_nibble(buf, i) {
            stats[n as usize] += 1;
        }
    }
}

/// Best-effort перенос записей в другую slotted-область.
///
/// Записи с непустым значением переносятся; записи с пустым значением при
/// `treat_empty_as_tombstone` применяются к dst как удаления и выбрасываются.
/// Возвращает true, если источник полностью разгружен.
pub fn sa_move_non_empty(buf: &mut [u8], dst: &mut [u8], treat_empty_as_tombstone: bool) -> bool {
    let entries = sa_list(buf);
    let mut all_moved = true;
    // Удаляем с конца, чтобы индексы младших слотов оставались валидными.
    for e in entries.iter().rev() {
        let key = e.key.as_path();
        if e.value.is_empty() && treat_empty_as_tombstone {
            sa_delete(dst, &key);
            sa_delete_at(buf, e.slot);
        } else if sa_try_set(dst, &key, &e.value) {
            sa_delete_at(buf, e.slot);
        } else {
            all_moved = false;
        }
    }
    all_moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nibble::NibblePathBuf;

    fn path_of(nibbles: &[u8]) -> NibblePathBuf {
        let mut p = NibblePathBuf::new();
        for &n in nibbles {
            p.push(n);
        }
        p
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let mut buf = vec![0u8; 512];
        sa_init(&mut buf);

        let keys: Vec<NibblePathBuf> = vec![
            path_of(&[]),
            path_of(&[0x1]),
            path_of(&[0x1, 0x2, 0x3]),
            path_of(&[0xA, 0xB, 0xC, 0xD]),
            path_of(&[0xA, 0xB, 0xC, 0xD, 0xE]),
            path_of(&[0x0, 0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8]),
        ];
        for (i, k) in keys.iter().enumerate() {
            let v = vec![i as u8 + 1; i + 1];
            assert!(sa_try_set(&mut buf, &k.as_path(), &v));
        }
        for (i, k) in keys.iter().enumerate() {
            let v = sa_try_get(&buf, &k.as_path()).expect("present");
            assert_eq!(v, vec![i as u8 + 1; i + 1].as_slice());
        }
        assert_eq!(sa_count(&buf), keys.len());

        assert!(sa_delete(&mut buf, &keys[2].as_path()));
        assert!(sa_try_get(&buf, &keys[2].as_path()).is_none());
        // Повторное удаление идемпотентно.
        assert!(!sa_delete(&mut buf, &keys[2].as_path()));
        assert_eq!(sa_count(&buf), keys.len() - 1);
    }

    #[test]
    fn overwrite_same_and_different_size() {
        let mut buf = vec![0u8; 256];
        sa_init(&mut buf);
        let k = path_of(&[0x5, 0x6, 0x7, 0x8, 0x9, 0xA]);

        assert!(sa_try_set(&mut buf, &k.as_path(), b"aaaa"));
        assert!(sa_try_set(&mut buf, &k.as_path(), b"bbbb"));
        assert_eq!(sa_try_get(&buf, &k.as_path()).unwrap(), b"bbbb");
        assert_eq!(sa_count(&buf), 1);

        assert!(sa_try_set(&mut buf, &k.as_path(), b"cc"));
        assert_eq!(sa_try_get(&buf, &k.as_path()).unwrap(), b"cc");
        assert_eq!(sa_count(&buf), 1);
    }

    #[test]
    fn capacity_conservation_and_defrag() {
        let mut buf = vec![0u8; 256];
        sa_init(&mut buf);

        let mut inserted = Vec::new();
        for i in 0u8..=0xF {
            let k = path_of(&[i, i ^ 0xF, 3, 4, 5, 6]);
            if sa_try_set(&mut buf, &k.as_path(), &[i; 8]) {
                inserted.push((k, i));
            }
        }
        assert!(!inserted.is_empty());
        let u = sa_usage(&buf);
        assert!(u.low + u.high <= u.data_len - SA_HDR_SIZE);
        assert_eq!(u.live, inserted.len());

        // Удалим половину и дефрагментируем.
        for (k, _) in inserted.iter().step_by(2) {
            assert!(sa_delete(&mut buf, &k.as_path()));
        }
        sa_defragment(&mut buf);
        let u = sa_usage(&buf);
        assert_eq!(u.deleted, 0);
        // Дефрагментация идемпотентна.
        sa_defragment(&mut buf);
        let u2 = sa_usage(&buf);
        assert_eq!(u.low, u2.low);
        assert_eq!(u.high, u2.high);

        for (idx, (k, i)) in inserted.iter().enumerate() {
            let got = sa_try_get(&buf, &k.as_path());
            if idx % 2 == 0 {
                assert!(got.is_none());
            } else {
                assert_eq!(got.unwrap(), &[*i; 8]);
            }
        }
    }

    #[test]
    fn tail_tombstones_reclaimed_eagerly() {
        let mut buf = vec![0u8; 256];
        sa_init(&mut buf);
        let a = path_of(&[1, 2, 3, 4, 5]);
        let b = path_of(&[2, 3, 4, 5, 6]);
        assert!(sa_try_set(&mut buf, &a.as_path(), b"first"));
        assert!(sa_try_set(&mut buf, &b.as_path(), b"second"));
        let before = sa_usage(&buf);

        // Хвостовой слот освобождается сразу, без дефрагментации.
        assert!(sa_delete(&mut buf, &b.as_path()));
        let after = sa_usage(&buf);
        assert_eq!(after.deleted, 0);
        assert!(after.low < before.low);
        assert!(after.high < before.high);
        assert_eq!(sa_try_get(&buf, &a.as_path()).unwrap(), b"first");
    }

    #[test]
    fn try_set_fails_only_when_full() {
        let mut buf = vec![0u8; 128];
        sa_init(&mut buf);
        let mut i = 0u8;
        loop {
            let k = path_of(&[i & 0xF, (i >> 4) & 0xF, 1, 2, 3]);
            if !sa_try_set(&mut buf, &k.as_path(), &[i; 16]) {
                break;
            }
            i += 1;
            assert!(i < 200, "должна была закончиться ёмкость");
        }
        let u = sa_usage(&buf);
        assert!(u.free < SA_SLOT_SIZE + 1 + 1 + 16);
    }

    #[test]
    fn enumerate_and_stats() {
        let mut buf = vec![0u8; 512];
        sa_init(&mut buf);
        let keys = [
            path_of(&[0x0, 1, 2, 3, 4, 5]),
            path_of(&[0x0, 5, 5]),
            path_of(&[0x7, 1, 2, 3]),
            path_of(&[0xF]),
        ];
        for (i, k) in keys.iter().enumerate() {
            assert!(sa_try_set(&mut buf, &k.as_path(), &[i as u8; 4]));
        }

        let all = sa_list(&buf);
        assert_eq!(all.len(), 4);
        for e in &all {
            let direct = sa_try_get(&buf, &e.key.as_path()).unwrap();
            assert_eq!(direct, e.value.as_slice());
        }

        let zeros = sa_list_nibble(&buf, 0x0);
        assert_eq!(zeros.len(), 2);

        let mut stats = [0u16; 16];
        sa_first_nibble_stats(&buf, &mut stats);
        assert_eq!(stats[0x0], 2);
        assert_eq!(stats[0x7], 1);
        assert_eq!(stats[0xF], 1);
        assert_eq!(stats.iter().map(|x| *x as usize).sum::<usize>(), 4);
    }

    #[test]
    fn move_non_empty_with_tombstones() {
        let mut src = vec![0u8; 256];
        let mut dst = vec![0u8; 256];
        sa_init(&mut src);
        sa_init(&mut dst);

        let live = path_of(&[1, 2, 3, 4, 5]);
        let dead = path_of(&[2, 3, 4, 5, 6]);
        assert!(sa_try_set(&mut dst, &dead.as_path(), b"old"));
        assert!(sa_try_set(&mut src, &live.as_path(), b"val"));
        assert!(sa_try_set(&mut src, &dead.as_path(), b"")); // tombstone

        assert!(sa_move_non_empty(&mut src, &mut dst, true));
        assert_eq!(sa_count(&src), 0);
        assert_eq!(sa_try_get(&dst, &live.as_path()).unwrap(), b"val");
        assert!(sa_try_get(&dst, &dead.as_path()).is_none());
    }

    #[test]
    fn rebuilt_keys_match_original() {
        let mut buf = vec![0u8; 512];
        sa_init(&mut buf);
        let long = path_of(&[0xD, 0xE, 0xA, 0xD, 0xB, 0xE, 0xE, 0xF, 0x0, 0x1, 0x2]);
        assert!(sa_try_set(&mut buf, &long.as_path(), b"x"));
        let all = sa_list(&buf);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key.as_path(), long.as_path());
    }
}
