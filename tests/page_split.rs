use anyhow::Result;

use PaprikaDB::consts::{ADDR_NULL, PAGE_MODE_FANOUT};
use PaprikaDB::nibble::NibblePathBuf;
use PaprikaDB::page::data::{child_of, page_mode};
use PaprikaDB::{CommitOptions, PagedDb};

fn key_with_first_nibble(first: u8, salt: u16) -> NibblePathBuf {
    let mut k = NibblePathBuf::new();
    k.push(first);
    // Ещё 8 нибблов, чтобы ключи были длинными и различались.
    for shift in [12u16, 8, 4, 0] {
        k.push(((salt >> shift) & 0xF) as u8);
    }
    for shift in [0u16, 4, 8, 12] {
        k.push(((salt >> shift) & 0xF) as u8);
    }
    k
}

#[test]
fn overfilled_page_pushes_populated_nibble_down() -> Result<()> {
    let db = PagedDb::open_memory(2, 8 * 1024 * 1024)?;
    let batch = db.begin_next()?;

    // Наполняем корневую fan-out страницу ключами с общим нулевым нибблом,
    // пока записи не перестанут помещаться локально.
    let mut keys = Vec::new();
    for salt in 0..600u16 {
        let k = key_with_first_nibble(0x0, salt);
        batch.set_raw(&k.as_path(), &salt.to_le_bytes())?;
        keys.push(k);

        let root = batch.tree_root();
        if child_of(batch.get_at(root), 0x0) != ADDR_NULL {
            break;
        }
    }

    let root = batch.tree_root();
    let root_page = batch.get_at(root);
    assert_eq!(page_mode(root_page), PAGE_MODE_FANOUT);
    assert_ne!(
        child_of(root_page, 0x0),
        ADDR_NULL,
        "самый населённый ниббл должен уйти на уровень ниже"
    );
    assert!(keys.len() > 100, "сплит раньше времени: {}", keys.len());

    // Все вставленные ключи читаются через корень.
    for (i, k) in keys.iter().enumerate() {
        let got = batch.try_get(&k.as_path()).expect("key must survive split");
        assert_eq!(got, (i as u16).to_le_bytes());
    }

    // И переживают коммит.
    batch.commit(CommitOptions::FlushDataAndRoot)?;
    drop(db);
    Ok(())
}

#[test]
fn deep_common_prefix_promotes_leaf_to_fanout() -> Result<()> {
    let db = PagedDb::open_memory(2, 8 * 1024 * 1024)?;
    let batch = db.begin_next()?;

    // Все ключи с общим первым нибблом: ребёнок корня сперва живёт в
    // leaf-режиме, обрастает overflow-страницей и в конце концов
    // повышается до fan-out.
    let mut keys = Vec::new();
    for salt in 0..1200u16 {
        let k = key_with_first_nibble(0x3, salt);
        batch.set_raw(&k.as_path(), &salt.to_le_bytes())?;
        keys.push(k);
    }

    let root = batch.tree_root();
    let child = child_of(batch.get_at(root), 0x3);
    assert_ne!(child, ADDR_NULL);
    assert_eq!(
        page_mode(batch.get_at(child)),
        PAGE_MODE_FANOUT,
        "после второго переполнения leaf обязан стать fan-out"
    );

    for (salt, k) in keys.iter().enumerate() {
        let got = batch.try_get(&k.as_path()).expect("present after promotion");
        assert_eq!(got, (salt as u16).to_le_bytes());
    }
    Ok(())
}

#[test]
fn mixed_nibbles_split_and_stay_readable() -> Result<()> {
    let db = PagedDb::open_memory(2, 8 * 1024 * 1024)?;
    let batch = db.begin_next()?;

    let mut keys = Vec::new();
    for salt in 0..1500u16 {
        let k = key_with_first_nibble((salt % 16) as u8, salt);
        batch.set_raw(&k.as_path(), &salt.to_le_bytes())?;
        keys.push((k, salt));
    }

    for (k, salt) in &keys {
        let got = batch.try_get(&k.as_path()).expect("present");
        assert_eq!(got, salt.to_le_bytes());
    }

    // Часть ключей удаляем и убеждаемся, что остальные не пострадали.
    for (k, _) in keys.iter().step_by(3) {
        batch.set_raw(&k.as_path(), &[])?;
    }
    for (i, (k, salt)) in keys.iter().enumerate() {
        let got = batch.try_get(&k.as_path());
        if i % 3 == 0 {
            assert!(got.is_none());
        } else {
            assert_eq!(got.expect("present"), salt.to_le_bytes());
        }
    }
    Ok(())
}
