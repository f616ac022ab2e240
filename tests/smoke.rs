use anyhow::Result;

use PaprikaDB::consts::PAGE_SIZE;
use PaprikaDB::key;
use PaprikaDB::{Account, CommitOptions, PagedDb, H256, U256};

#[test]
fn smoke_memory_batch_write_read() -> Result<()> {
    let db = PagedDb::open_memory(2, 4 * 1024 * 1024)?;

    let addr = H256::repeat_byte(0x11);
    let account = Account::new(U256::from(1_000u64), 7);

    // 1) write-батч: запись + read-your-writes
    {
        let batch = db.begin_next()?;
        let k = key::account_key(&addr);
        let mut payload = Vec::new();
        account.write_to(&mut payload);
        batch.set_raw(&k.as_path(), &payload)?;

        let got = batch.try_get(&k.as_path()).expect("visible in own batch");
        assert_eq!(got, payload.as_slice());

        batch.set_metadata(1, H256::repeat_byte(0xB1));
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    // 2) reader: значение и метаданные
    {
        let reader = db.begin_read_only();
        assert_eq!(reader.metadata(), (1, H256::repeat_byte(0xB1)));
        assert_eq!(reader.get_account(&addr)?, account);

        // Чужой адрес пуст.
        let other = H256::repeat_byte(0x22);
        assert_eq!(reader.get_account(&other)?, Account::EMPTY);
    }

    // 3) удаление пустым значением
    {
        let batch = db.begin_next()?;
        let k = key::account_key(&addr);
        batch.set_raw(&k.as_path(), &[])?;
        assert!(batch.try_get(&k.as_path()).is_none());
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }
    {
        let reader = db.begin_read_only();
        assert_eq!(reader.get_account(&addr)?, Account::EMPTY);
    }

    Ok(())
}

#[test]
fn storage_cells_are_isolated_per_slot() -> Result<()> {
    let db = PagedDb::open_memory(2, 4 * 1024 * 1024)?;
    let addr = H256::repeat_byte(0x42);
    let s0 = H256::repeat_byte(0x01);
    let s1 = H256::repeat_byte(0x02);

    {
        let batch = db.begin_next()?;
        let k = key::storage_key(&addr, &s0);
        batch.set_raw(&k.as_path(), &[0xDE, 0xAD, 0xBE, 0xEF])?;
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    let reader = db.begin_read_only();
    assert_eq!(reader.get_storage(&addr, &s0), U256::from(0xDEAD_BEEFu64));
    assert_eq!(reader.get_storage(&addr, &s1), U256::zero());
    Ok(())
}

#[test]
fn delete_by_prefix_wipes_storage_tree() -> Result<()> {
    let db = PagedDb::open_memory(2, 4 * 1024 * 1024)?;
    let addr = H256::repeat_byte(0x55);
    let other = H256::repeat_byte(0x66);

    {
        let batch = db.begin_next()?;
        for i in 0..32u8 {
            let slot = H256::repeat_byte(i);
            batch.set_raw(&key::storage_key(&addr, &slot).as_path(), &[i + 1])?;
            batch.set_raw(&key::storage_key(&other, &slot).as_path(), &[i + 1])?;
        }
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    {
        let batch = db.begin_next()?;
        batch.delete_by_prefix(&key::storage_prefix(&addr).as_path())?;
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    let reader = db.begin_read_only();
    for i in 0..32u8 {
        let slot = H256::repeat_byte(i);
        assert_eq!(reader.get_storage(&addr, &slot), U256::zero());
        assert_eq!(
            reader.get_storage(&other, &slot),
            U256::from(i as u64 + 1),
            "чужое storage-дерево должно уцелеть"
        );
    }
    Ok(())
}

#[test]
fn scan_prefix_sees_only_live_entries() -> Result<()> {
    let db = PagedDb::open_memory(2, 4 * 1024 * 1024)?;
    let addr = H256::repeat_byte(0x71);

    {
        let batch = db.begin_next()?;
        for i in 0..20u8 {
            let slot = H256::repeat_byte(i);
            batch.set_raw(&key::storage_key(&addr, &slot).as_path(), &[i + 1, 0xAA])?;
        }
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }
    // Второй батч удаляет каждую четвёртую ячейку.
    {
        let batch = db.begin_next()?;
        for i in (0..20u8).step_by(4) {
            let slot = H256::repeat_byte(i);
            batch.set_raw(&key::storage_key(&addr, &slot).as_path(), &[])?;
        }
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    let reader = db.begin_read_only();
    let found = reader.scan_prefix(&key::storage_prefix(&addr).as_path());
    assert_eq!(found.len(), 15);
    for (k, v) in &found {
        assert_eq!(k.len(), 1 + 64 + 64);
        assert_eq!(v.len(), 2);
        assert_eq!(v[1], 0xAA);
    }
    // Полный скан включает и эти записи.
    assert!(reader.scan_all().len() >= found.len());
    Ok(())
}

#[test]
fn size_must_be_page_aligned() {
    assert!(PagedDb::open_memory(2, PAGE_SIZE * 16 + 1).is_err());
    assert!(PagedDb::open_memory(0, PAGE_SIZE * 16).is_err());
    assert!(PagedDb::open_memory(2, PAGE_SIZE * 2).is_err());
}
