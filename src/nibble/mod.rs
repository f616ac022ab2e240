//! Nibble paths: packed sequences of 4-bit digits addressing the trie.
//!
//! Layout:
//! - A path is a view over a byte slice plus `(odd, length)`:
//!   odd=0 — путь начинается со старшего ниббла байта 0,
//!   odd=1 — с младшего ниббла байта 0.
//! - Slicing не копирует байты; append пакует в caller-provided scratch.
//!
//! Serialized form: [preamble u8 = (length << 1) | odd] + (length+odd+1)/2
//! payload bytes. Неиспользуемый хвостовой полубайт маскируется в ноль.
//!
//! Равенство сравнивает только ниббл-последовательности: два пути равны,
//! если равны длины и все нибблы, независимо от выравнивания (odd).

use anyhow::{anyhow, Result};

/// Максимальная длина пути в нибблах (тег + account-путь + storage-путь).
pub const MAX_NIBBLE_LEN: usize = 130;

/// Размер scratch-буфера, достаточный для append любого одиночного ниббла.
#[inline]
pub const fn append_scratch_len(length: usize) -> usize {
    length / 2 + 2
}

/// Borrowed view над байтовым слайсом.
#[derive(Clone, Copy, Debug)]
pub struct NibblePath<'a> {
    data: &'a [u8],
    odd: u8,    // 0 | 1
    length: u8, // число нибблов
}

impl<'a> NibblePath<'a> {
    /// Пустой путь.
    pub const EMPTY: NibblePath<'static> = NibblePath {
        data: &[],
        odd: 0,
        length: 0,
    };

    /// Путь из `length` нибблов, начиная с ниббла `nibble_from` внутри `buf`.
    pub fn from_bytes(buf: &'a [u8], nibble_from: usize, length: usize) -> NibblePath<'a> {
        debug_assert!(length <= MAX_NIBBLE_LEN);
        let odd = (nibble_from & 1) as u8;
        let start = nibble_from / 2;
        let bytes = (odd as usize + length + 1) / 2;
        NibblePath {
            data: &buf[start..start + bytes],
            odd,
            length: length as u8,
        }
    }

    /// Весь 32-байтовый ключ как путь из 64 нибблов.
    #[inline]
    pub fn from_key_bytes(buf: &'a [u8]) -> NibblePath<'a> {
        NibblePath::from_bytes(buf, 0, buf.len() * 2)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn odd(&self) -> u8 {
        self.odd
    }

    /// Ниббл на позиции `i` (0-based).
    #[inline]
    pub fn get(&self, i: usize) -> u8 {
        debug_assert!(i < self.len());
        let pos = self.odd as usize + i;
        let b = self.data[pos / 2];
        if pos & 1 == 0 {
            b >> 4
        } else {
            b & 0x0F
        }
    }

    #[inline]
    pub fn first(&self) -> u8 {
        self.get(0)
    }

    /// Хвост пути начиная с ниббла `n`. Без копирования.
    pub fn slice_from(&self, n: usize) -> NibblePath<'a> {
        debug_assert!(n <= self.len());
        let pos = self.odd as usize + n;
        let odd = (pos & 1) as u8;
        let length = self.length - n as u8;
        let start = pos / 2;
        let bytes = (odd as usize + length as usize + 1) / 2;
        NibblePath {
            data: &self.data[start..start + bytes],
            odd,
            length,
        }
    }

    /// Префикс из первых `n` нибблов. Без копирования.
    pub fn slice_to(&self, n: usize) -> NibblePath<'a> {
        debug_assert!(n <= self.len());
        let bytes = (self.odd as usize + n + 1) / 2;
        NibblePath {
            data: &self.data[..bytes],
            odd: self.odd,
            length: n as u8,
        }
    }

    /// Индекс первого различающегося ниббла; min(len_a, len_b), если один
    /// путь является префиксом другого.
    pub fn first_different(&self, other: &NibblePath<'_>) -> usize {
        let min_len = self.len().min(other.len());
        if min_len == 0 {
            return 0;
        }

        if self.odd != other.odd {
            // Разное выравнивание — честный поцикловый путь.
            let mut i = 0;
            while i < min_len && self.get(i) == other.get(i) {
                i += 1;
            }
            return i;
        }

        // Одинаковый odd: ведущий полубайт отдельно, дальше — побайтово.
        let mut i = 0;
        if self.odd == 1 {
            if self.get(0) != other.get(0) {
                return 0;
            }
            i = 1;
        }
        let mut bi = (self.odd as usize + i) / 2;
        while i + 2 <= min_len {
            let a = self.data[bi];
            let b = other.data[bi];
            if a != b {
                // Старший ниббл различается? Иначе различие в младшем.
                return if a >> 4 != b >> 4 { i } else { i + 1 };
            }
            i += 2;
            bi += 1;
        }
        if i < min_len && self.get(i) == other.get(i) {
            i += 1;
        }
        i
    }

    /// Упаковать нибблы в `out` с чётного выравнивания (старший ниббл байта 0).
    /// Возвращает число записанных байт; хвостовой полубайт занулён.
    pub fn copy_packed(&self, out: &mut [u8]) -> usize {
        let nbytes = (self.len() + 1) / 2;
        debug_assert!(out.len() >= nbytes);
        if self.odd == 0 {
            out[..nbytes].copy_from_slice(&self.data[..nbytes]);
            if self.len() & 1 == 1 {
                out[nbytes - 1] &= 0xF0;
            }
        } else {
            for i in 0..self.len() {
                let n = self.get(i);
                if i & 1 == 0 {
                    out[i / 2] = n << 4;
                } else {
                    out[i / 2] |= n;
                }
            }
        }
        nbytes
    }

    /// Дописать один ниббл; результат пакуется в `scratch` с чётного
    /// выравнивания.
    pub fn append_nibble<'s>(&self, nibble: u8, scratch: &'s mut [u8]) -> NibblePath<'s> {
        debug_assert!(scratch.len() >= append_scratch_len(self.len()));
        let n = self.copy_packed(scratch);
        let len = self.len();
        if len & 1 == 0 {
            scratch[len / 2] = nibble << 4;
        } else {
            scratch[n - 1] |= nibble & 0x0F;
        }
        NibblePath {
            data: &scratch[..len / 2 + 1],
            odd: 0,
            length: self.length + 1,
        }
    }

    /// Конкатенация self ++ other в `scratch` (чётное выравнивание).
    pub fn append<'s>(&self, other: &NibblePath<'_>, scratch: &'s mut [u8]) -> NibblePath<'s> {
        let total = self.len() + other.len();
        debug_assert!(total <= MAX_NIBBLE_LEN);
        debug_assert!(scratch.len() >= total / 2 + 1 || total == 0);
        for b in scratch.iter_mut().take((total + 1) / 2) {
            *b = 0;
        }
        let mut pos = 0usize;
        for i in 0..self.len() {
            put_nibble(scratch, pos, self.get(i));
            pos += 1;
        }
        for i in 0..other.len() {
            put_nibble(scratch, pos, other.get(i));
            pos += 1;
        }
        NibblePath {
            data: &scratch[..(total + 1) / 2],
            odd: 0,
            length: total as u8,
        }
    }

    /// Сериализация: преамбула + payload-байты (хвостовой полубайт занулён).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push((self.length << 1) | self.odd);
        let nbytes = (self.odd as usize + self.len() + 1) / 2;
        let start = out.len();
        out.extend_from_slice(&self.data[..nbytes]);
        // Маскируем неиспользуемые полубайты до канонического вида.
        if nbytes > 0 {
            if self.odd == 1 {
                out[start] &= 0x0F;
            }
            if (self.odd as usize + self.len()) & 1 == 1 {
                out[start + nbytes - 1] &= 0xF0;
            }
        }
    }

    /// Разбор сериализованной формы; возвращает путь и остаток слайса.
    pub fn read_from(src: &'a [u8]) -> Result<(NibblePath<'a>, &'a [u8])> {
        if src.is_empty() {
            return Err(anyhow!("nibble path: empty input"));
        }
        let preamble = src[0];
        let odd = preamble & 1;
        let length = preamble >> 1;
        let nbytes = (odd as usize + length as usize + 1) / 2;
        if src.len() < 1 + nbytes {
            return Err(anyhow!(
                "nibble path: truncated input (need {} bytes, got {})",
                1 + nbytes,
                src.len()
            ));
        }
        Ok((
            NibblePath {
                data: &src[1..1 + nbytes],
                odd,
                length,
            },
            &src[1 + nbytes..],
        ))
    }

    /// Хэш пути: длина + ведущий полубайт (при odd) + хвостовой ниббл (при
    /// нечётном конце) + CRC32C по выровненным средним байтам.
    pub fn hash(&self) -> u32 {
        let len = self.len();
        let mut start = 0usize;
        let mut h = (len as u32).wrapping_mul(0x9E37_79B1);
        if self.odd == 1 && len > 0 {
            h = h.rotate_left(5) ^ self.get(0) as u32;
            start = 1;
        }
        let rem = len - start;
        let byte_start = (self.odd as usize + start) / 2;
        let full = rem / 2;
        h ^= crc32c::crc32c(&self.data[byte_start..byte_start + full]);
        if rem & 1 == 1 {
            h = h.rotate_left(7) ^ self.get(len - 1) as u32;
        }
        h
    }
}

impl PartialEq for NibblePath<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.first_different(other) == self.len()
    }
}

impl Eq for NibblePath<'_> {}

#[inline]
fn put_nibble(buf: &mut [u8], pos: usize, nibble: u8) {
    if pos & 1 == 0 {
        buf[pos / 2] = (buf[pos / 2] & 0x0F) | (nibble << 4);
    } else {
        buf[pos / 2] = (buf[pos / 2] & 0xF0) | (nibble & 0x0F);
    }
}

/// Owned-путь: чётно выровненная упаковка. Используется там, где путь
/// восстанавливается из slotted-хранилища или строится с нуля (ключи).
#[derive(Clone, Debug, Default)]
pub struct NibblePathBuf {
    bytes: Vec<u8>,
    length: u8,
}

impl NibblePathBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nibbles: usize) -> Self {
        Self {
            bytes: Vec::with_capacity((nibbles + 1) / 2),
            length: 0,
        }
    }

    /// Скопировать произвольный путь в owned-форму (чётное выравнивание).
    pub fn from_path(path: &NibblePath<'_>) -> Self {
        let mut out = Self::with_capacity(path.len());
        for i in 0..path.len() {
            out.push(path.get(i));
        }
        out
    }

    pub fn push(&mut self, nibble: u8) {
        debug_assert!((self.length as usize) < MAX_NIBBLE_LEN);
        if self.length & 1 == 0 {
            self.bytes.push(nibble << 4);
        } else {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= nibble & 0x0F;
        }
        self.length += 1;
    }

    /// Дописать все нибблы из `path`.
    pub fn push_path(&mut self, path: &NibblePath<'_>) {
        for i in 0..path.len() {
            self.push(path.get(i));
        }
    }

    /// Убрать последний ниббл.
    pub fn pop(&mut self) {
        debug_assert!(self.length > 0);
        self.length -= 1;
        if self.length & 1 == 0 {
            // Снятый ниббл занимал старшую половину последнего байта.
            self.bytes.pop();
        } else {
            let last = self.bytes.len() - 1;
            self.bytes[last] &= 0xF0;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn as_path(&self) -> NibblePath<'_> {
        NibblePath {
            data: &self.bytes,
            odd: 0,
            length: self.length,
        }
    }
}
