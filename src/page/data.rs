//! Trie data pages: nibble fan-out over slotted storage.
//!
//! Страница работает в одном из двух режимов (header.metadata):
//! - fan-out (0): 16 child-адресов + локальная slotted-карта. Тип DATA.
//! - leaf (1): buckets[0] — адрес единственной overflow-страницы, локальная
//!   slotted-карта. Тип BOTTOM. Свежие дети создаются в leaf-режиме;
//!   второй overflow не растёт — вместо него страница повышается до fan-out.
//!
//! Раскладка payload одинакова в обоих режимах: [16 x u32 buckets][slotted],
//! поэтому смена режима не перестраивает slotted-область.
//!
//! Семантика значений: пустое значение — удаление. Если ключ может жить
//! глубже (child существует, но ещё не скопирован в батч), пустое значение
//! остаётся в локальной карте как tombstone и затеняет ребёнка.
//!
//! CoW: каждый шаг спуска проходит через ensure_writable; мутируются только
//! страницы, проштампованные текущим батчем.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

use crate::consts::{
    ADDR_NULL, ADDR_SIZE, BUCKET_COUNT, DATA_SLOTTED_OFF, OVERFLOW_SLOTTED_OFF, PAGE_HDR_SIZE,
    PAGE_MODE_FANOUT, PAGE_MODE_LEAF, PAGE_TYPE_BOTTOM, PAGE_TYPE_DATA, PAGE_TYPE_LEAF_OVERFLOW,
};
use crate::nibble::{NibblePath, NibblePathBuf};
use crate::page::{page_header_read, page_init};
use crate::slotted::{
    sa_delete, sa_delete_at, sa_first_nibble_stats, sa_list, sa_list_nibble, sa_try_get,
    sa_try_set, SaEntry,
};
use crate::store::batch::{PageSource, WriteBatch};

#[inline]
fn bucket_get(buf: &[u8], i: usize) -> u32 {
    debug_assert!(i < BUCKET_COUNT);
    let off = PAGE_HDR_SIZE + i * ADDR_SIZE;
    LittleEndian::read_u32(&buf[off..off + 4])
}

#[inline]
fn bucket_set(buf: &mut [u8], i: usize, addr: u32) {
    debug_assert!(i < BUCKET_COUNT);
    let off = PAGE_HDR_SIZE + i * ADDR_SIZE;
    LittleEndian::write_u32(&mut buf[off..off + 4], addr);
}

#[inline]
fn mode(buf: &[u8]) -> u8 {
    buf[7]
}

/// Адрес ребёнка по нибблу (fan-out) либо overflow-страницы (leaf, ниббл 0).
pub fn child_of(buf: &[u8], nibble: u8) -> u32 {
    bucket_get(buf, nibble as usize)
}

/// Режим страницы: PAGE_MODE_FANOUT | PAGE_MODE_LEAF.
pub fn page_mode(buf: &[u8]) -> u8 {
    mode(buf)
}

#[inline]
fn level(buf: &[u8]) -> u8 {
    buf[6]
}

/// Инициализировать trie-страницу. Leaf-режим получает тип BOTTOM,
/// fan-out — DATA; тег типа и байт режима всегда согласованы.
pub fn data_page_init(buf: &mut [u8], batch_id: u32, level: u8, page_mode: u8) {
    let ptype = if page_mode == PAGE_MODE_LEAF {
        PAGE_TYPE_BOTTOM
    } else {
        PAGE_TYPE_DATA
    };
    page_init(buf, batch_id, ptype, level, page_mode);
}

/// Обнулить slotted-карту и все child-адреса (заголовок не трогаем).
pub fn data_page_clear(buf: &mut [u8]) {
    for b in &mut buf[PAGE_HDR_SIZE..DATA_SLOTTED_OFF] {
        *b = 0;
    }
    for b in &mut buf[DATA_SLOTTED_OFF..DATA_SLOTTED_OFF + 8] {
        *b = 0;
    }
}

/// Записать пару в дерево с корнем `root`. Возвращает (возможно новый
/// после CoW) адрес корня. Пустое значение — удаление.
pub fn tree_set(
    batch: &WriteBatch,
    root: u32,
    key: &NibblePath<'_>,
    value: &[u8],
) -> Result<u32> {
    let root = if root == ADDR_NULL {
        if value.is_empty() {
            // Удаление из пустого дерева.
            return Ok(ADDR_NULL);
        }
        let addr = batch.get_new_page(false)?;
        data_page_init(batch.page_mut(addr), batch.id(), 0, PAGE_MODE_FANOUT);
        addr
    } else {
        batch.ensure_writable(root)?
    };
    page_set(batch, root, key, value)?;
    Ok(root)
}

/// Спуск в ребёнка: CoW при необходимости + запись. Возвращает адрес
/// (возможно новый) поддерева.
fn set_in_child(
    batch: &WriteBatch,
    child: u32,
    key: &NibblePath<'_>,
    value: &[u8],
) -> Result<u32> {
    let child = batch.ensure_writable(child)?;
    page_set(batch, child, key, value)?;
    Ok(child)
}

/// Запись в уже writable-страницу `addr`.
fn page_set(batch: &WriteBatch, addr: u32, key: &NibblePath<'_>, value: &[u8]) -> Result<()> {
    debug_assert!(batch.was_written(addr));
    loop {
        let buf = batch.page_mut(addr);
        if mode(buf) == PAGE_MODE_LEAF {
            if leaf_set(batch, addr, key, value)? {
                return Ok(());
            }
            // Страница повышена до fan-out — заходим ещё раз.
            continue;
        }

        // --- fan-out ---
        if value.is_empty() {
            let child = if key.is_empty() {
                ADDR_NULL
            } else {
                bucket_get(buf, key.first() as usize)
            };
            if child == ADDR_NULL {
                // Глубже ключа нет — достаточно локального удаления.
                sa_delete(&mut buf[DATA_SLOTTED_OFF..], key);
                return Ok(());
            }
            if batch.was_written(child) {
                let nib = key.first() as usize;
                let tail = key.slice_from(1);
                // Локальная запись не должна затенять удаление внизу.
                sa_delete(&mut buf[DATA_SLOTTED_OFF..], key);
                let new_child = set_in_child(batch, child, &tail, value)?;
                bucket_set(buf, nib, new_child);
                return Ok(());
            }
            // Ребёнок ещё чужой — локальный tombstone затеняет его.
            if sa_try_set(&mut buf[DATA_SLOTTED_OFF..], key, value) {
                return Ok(());
            }
        } else {
            if !key.is_empty() {
                let child = bucket_get(buf, key.first() as usize);
                if child != ADDR_NULL && batch.was_written(child) {
                    let nib = key.first() as usize;
                    let tail = key.slice_from(1);
                    // Свежая запись внизу; локальная тень устарела бы.
                    sa_delete(&mut buf[DATA_SLOTTED_OFF..], key);
                    let new_child = set_in_child(batch, child, &tail, value)?;
                    bucket_set(buf, nib, new_child);
                    return Ok(());
                }
            }
            if sa_try_set(&mut buf[DATA_SLOTTED_OFF..], key, value) {
                return Ok(());
            }
        }

        // Не влезло: выталкиваем вниз самый населённый ниббл и повторяем.
        flush_down(batch, addr)?;
    }
}

/// Выбрать ниббл и вытолкнуть его записи на уровень ниже.
fn flush_down(batch: &WriteBatch, addr: u32) -> Result<()> {
    let buf = batch.page_mut(addr);
    let mut stats = [0u16; 16];
    sa_first_nibble_stats(&buf[DATA_SLOTTED_OFF..], &mut stats);

    // Сначала — существующие дети (старший индекс), затем самый
    // населённый ниббл в целом (при равенстве — младший индекс).
    let mut nibble: Option<usize> = None;
    for i in (0..BUCKET_COUNT).rev() {
        if stats[i] > 0 && bucket_get(buf, i) != ADDR_NULL {
            nibble = Some(i);
            break;
        }
    }
    if nibble.is_none() {
        let mut best = 0usize;
        for i in 1..BUCKET_COUNT {
            if stats[i] > stats[best] {
                best = i;
            }
        }
        if stats[best] == 0 {
            return Err(anyhow!(
                "entry does not fit into page {} (nothing to flush down)",
                addr
            ));
        }
        nibble = Some(best);
    }
    let nibble = nibble.unwrap();

    let child = bucket_get(buf, nibble);
    let child = if child == ADDR_NULL {
        let fresh = batch.get_new_page(false)?;
        data_page_init(
            batch.page_mut(fresh),
            batch.id(),
            level(buf) + 1,
            PAGE_MODE_LEAF,
        );
        fresh
    } else {
        batch.ensure_writable(child)?
    };
    bucket_set(buf, nibble, child);

    let entries = sa_list_nibble(&buf[DATA_SLOTTED_OFF..], nibble as u8);
    debug_assert!(!entries.is_empty());
    for e in &entries {
        page_set(batch, child, &e.key.as_path().slice_from(1), &e.value)?;
    }
    // Enumerator-aware удаление: с конца, чтобы индексы не поплыли.
    for e in entries.iter().rev() {
        sa_delete_at(&mut buf[DATA_SLOTTED_OFF..], e.slot);
    }
    Ok(())
}

/// Leaf-режим. Ok(true) — записано; Ok(false) — страница повышена до
/// fan-out, вызывающий должен повторить запись.
fn leaf_set(batch: &WriteBatch, addr: u32, key: &NibblePath<'_>, value: &[u8]) -> Result<bool> {
    let buf = batch.page_mut(addr);
    let overflow = bucket_get(buf, 0);

    if value.is_empty() && overflow == ADDR_NULL {
        sa_delete(&mut buf[DATA_SLOTTED_OFF..], key);
        return Ok(true);
    }
    if sa_try_set(&mut buf[DATA_SLOTTED_OFF..], key, value) {
        return Ok(true);
    }

    // Карта полна: выносим всё непустое в overflow-страницу.
    let ovf = if overflow == ADDR_NULL {
        let fresh = batch.get_new_page(false)?;
        page_init(
            batch.page_mut(fresh),
            batch.id(),
            PAGE_TYPE_LEAF_OVERFLOW,
            level(buf),
            0,
        );
        fresh
    } else {
        batch.ensure_writable(overflow)?
    };
    bucket_set(buf, 0, ovf);

    let ovf_buf = batch.page_mut(ovf);
    crate::slotted::sa_move_non_empty(
        &mut buf[DATA_SLOTTED_OFF..],
        &mut ovf_buf[OVERFLOW_SLOTTED_OFF..],
        true,
    );

    if sa_try_set(&mut buf[DATA_SLOTTED_OFF..], key, value) {
        return Ok(true);
    }

    // Не помогло — повышаем страницу до fan-out.
    promote_leaf(batch, addr, ovf)?;
    Ok(false)
}

/// Повышение leaf-страницы: слить overflow обратно, выбрать самый
/// населённый ниббл, завести для него свежего leaf-ребёнка.
fn promote_leaf(batch: &WriteBatch, addr: u32, ovf: u32) -> Result<()> {
    let buf = batch.page_mut(addr);
    let ovf_buf = batch.page_mut(ovf);

    // Локальные записи главнее: одноимённые ключи в overflow устарели.
    let local = sa_list(&buf[DATA_SLOTTED_OFF..]);
    let mut stale: Vec<usize> = Vec::new();
    for oe in sa_list(&ovf_buf[OVERFLOW_SLOTTED_OFF..]) {
        if local
            .iter()
            .any(|le| le.key.as_path() == oe.key.as_path())
        {
            stale.push(oe.slot);
        }
    }
    for slot in stale.into_iter().rev() {
        sa_delete_at(&mut ovf_buf[OVERFLOW_SLOTTED_OFF..], slot);
    }
    let spilled: Vec<SaEntry> = sa_list(&ovf_buf[OVERFLOW_SLOTTED_OFF..]);

    // Overflow-страница больше не нужна.
    bucket_set(buf, 0, ADDR_NULL);
    batch.register_for_future_reuse(ovf)?;

    // Смена режима: тип и metadata согласованно.
    buf[5] = PAGE_TYPE_DATA;
    buf[7] = PAGE_MODE_FANOUT;

    // Самый населённый ниббл по local ∪ spilled.
    let mut stats = [0u16; 16];
    sa_first_nibble_stats(&buf[DATA_SLOTTED_OFF..], &mut stats);
    for e in &spilled {
        if !e.key.is_empty() {
            stats[e.key.as_path().first() as usize] += 1;
        }
    }
    let mut best = 0usize;
    for i in 1..BUCKET_COUNT {
        if stats[i] > stats[best] {
            best = i;
        }
    }
    if stats[best] > 0 {
        let child = batch.get_new_page(false)?;
        data_page_init(
            batch.page_mut(child),
            batch.id(),
            level(buf) + 1,
            PAGE_MODE_LEAF,
        );
        bucket_set(buf, best, child);
    }

    // Вернуть вынесенные записи обычным fan-out путём.
    for e in &spilled {
        page_set(batch, addr, &e.key.as_path(), &e.value)?;
    }
    Ok(())
}

/// Итеративный поиск. Пустое значение (tombstone) даёт None и не
/// спускается ниже.
pub fn tree_get<'s, S: PageSource>(
    src: &'s S,
    root: u32,
    key: &NibblePath<'_>,
) -> Option<&'s [u8]> {
    let mut addr = root;
    let mut key = *key;
    loop {
        if addr == ADDR_NULL {
            return None;
        }
        let buf = src.page(addr);
        debug_assert!(page_header_read(buf).is_ok());

        if mode(buf) == PAGE_MODE_LEAF {
            if let Some(v) = sa_try_get(&buf[DATA_SLOTTED_OFF..], &key) {
                return non_tombstone(v);
            }
            let ovf = bucket_get(buf, 0);
            if ovf == ADDR_NULL {
                return None;
            }
            return sa_try_get(&src.page(ovf)[OVERFLOW_SLOTTED_OFF..], &key)
                .and_then(non_tombstone);
        }

        if let Some(v) = sa_try_get(&buf[DATA_SLOTTED_OFF..], &key) {
            return non_tombstone(v);
        }
        if key.is_empty() {
            return None;
        }
        addr = bucket_get(buf, key.first() as usize);
        key = key.slice_from(1);
    }
}

#[inline]
fn non_tombstone(v: &[u8]) -> Option<&[u8]> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Собрать все живые пары с данным префиксом ключа.
///
/// Затенение (локальная запись поверх устаревшей копии в ребёнке)
/// разрешается приоритетом «ближе к корню — главнее»: ключ кладётся в
/// аккумулятор только первый раз. Tombstone-ы подавляют глубокие копии и
/// отфильтровываются на выходе.
pub fn tree_scan<S: PageSource>(
    src: &S,
    root: u32,
    prefix: &NibblePath<'_>,
) -> Vec<(NibblePathBuf, Vec<u8>)> {
    let mut acc: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    let mut base = NibblePathBuf::new();
    if root != ADDR_NULL {
        scan_page(src, root, prefix, &mut base, &mut acc);
    }
    let mut out = Vec::with_capacity(acc.len());
    for (k, v) in acc {
        if v.is_empty() {
            continue;
        }
        let (path, _) = NibblePath::read_from(&k).expect("accumulator holds serialized paths");
        out.push((NibblePathBuf::from_path(&path), v));
    }
    out
}

fn scan_page<S: PageSource>(
    src: &S,
    addr: u32,
    prefix: &NibblePath<'_>,
    base: &mut NibblePathBuf,
    acc: &mut HashMap<Vec<u8>, Vec<u8>>,
) {
    let buf = src.page(addr);

    let mut collect = |region: &[u8], base: &NibblePathBuf| {
        for e in sa_list(region) {
            let mut full = base.clone();
            full.push_path(&e.key.as_path());
            let p = full.as_path();
            if p.len() < prefix.len() || p.first_different(prefix) != prefix.len() {
                continue;
            }
            let mut ser = Vec::with_capacity(1 + (p.len() + 1) / 2);
            p.write_to(&mut ser);
            acc.entry(ser).or_insert(e.value);
        }
    };

    collect(&buf[DATA_SLOTTED_OFF..], base);

    if mode(buf) == PAGE_MODE_LEAF {
        let ovf = bucket_get(buf, 0);
        if ovf != ADDR_NULL {
            collect(&src.page(ovf)[OVERFLOW_SLOTTED_OFF..], base);
        }
        return;
    }
    drop(collect);

    for i in 0..BUCKET_COUNT {
        let child = bucket_get(buf, i);
        if child == ADDR_NULL {
            continue;
        }
        // Ветку можно не обходить, если префикс требует другой ниббл.
        if base.len() < prefix.len() && prefix.get(base.len()) != i as u8 {
            continue;
        }
        base.push(i as u8);
        scan_page(src, child, prefix, base, acc);
        base.pop();
    }
}

/// Удалить все записи, чей ключ начинается с `prefix`. Возвращает адрес
/// (возможно новый) поддерева.
pub fn tree_delete_by_prefix(
    batch: &WriteBatch,
    root: u32,
    prefix: &NibblePath<'_>,
) -> Result<u32> {
    if root == ADDR_NULL {
        return Ok(ADDR_NULL);
    }
    let root = batch.ensure_writable(root)?;
    page_delete_by_prefix(batch, root, prefix)?;
    Ok(root)
}

fn page_delete_by_prefix(batch: &WriteBatch, addr: u32, prefix: &NibblePath<'_>) -> Result<()> {
    let buf = batch.page_mut(addr);

    if mode(buf) == PAGE_MODE_LEAF {
        delete_prefix_in_map(&mut buf[DATA_SLOTTED_OFF..], prefix);
        let ovf = bucket_get(buf, 0);
        if ovf != ADDR_NULL {
            let ovf = batch.ensure_writable(ovf)?;
            bucket_set(buf, 0, ovf);
            delete_prefix_in_map(&mut batch.page_mut(ovf)[OVERFLOW_SLOTTED_OFF..], prefix);
        }
        return Ok(());
    }

    if prefix.is_empty() {
        // Пустой префикс накрывает все поддеревья.
        for i in 0..BUCKET_COUNT {
            let child = bucket_get(buf, i);
            if child != ADDR_NULL {
                let child = batch.ensure_writable(child)?;
                bucket_set(buf, i, child);
                page_delete_by_prefix(batch, child, prefix)?;
            }
        }
    } else {
        let child = bucket_get(buf, prefix.first() as usize);
        if child != ADDR_NULL {
            let nib = prefix.first() as usize;
            let child = batch.ensure_writable(child)?;
            bucket_set(buf, nib, child);
            page_delete_by_prefix(batch, child, &prefix.slice_from(1))?;
        }
    }
    delete_prefix_in_map(&mut buf[DATA_SLOTTED_OFF..], prefix);
    Ok(())
}

fn delete_prefix_in_map(sl: &mut [u8], prefix: &NibblePath<'_>) {
    let doomed: Vec<usize> = sa_list(sl)
        .into_iter()
        .filter(|e| {
            e.key.len() >= prefix.len()
                && e.key.as_path().first_different(prefix) == prefix.len()
        })
        .map(|e| e.slot)
        .collect();
    for slot in doomed.into_iter().rev() {
        sa_delete_at(sl, slot);
    }
}
