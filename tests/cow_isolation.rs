use anyhow::Result;

use PaprikaDB::key;
use PaprikaDB::{CommitOptions, PagedDb, H256};

// Read-батч, открытый до коммита писателя, обязан видеть старое состояние
// всё время своей жизни — страницы снапшота не мутируются на месте.
#[test]
fn readers_do_not_observe_in_progress_batches() -> Result<()> {
    let db = PagedDb::open_memory(2, 8 * 1024 * 1024)?;
    let addr = H256::repeat_byte(0x01);
    let k = key::account_key(&addr);

    {
        let batch = db.begin_next()?;
        batch.set_raw(&k.as_path(), b"v1")?;
        batch.set_metadata(1, H256::repeat_byte(1));
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    let old_reader = db.begin_read_only();
    assert_eq!(old_reader.try_get(&k.as_path()).unwrap(), b"v1");

    // Писатель переписывает ключ и коммитит.
    {
        let batch = db.begin_next()?;
        batch.set_raw(&k.as_path(), b"v2-bigger")?;
        // До коммита читатель стабилен.
        assert_eq!(old_reader.try_get(&k.as_path()).unwrap(), b"v1");
        batch.set_metadata(2, H256::repeat_byte(2));
        batch.commit(CommitOptions::FlushDataAndRoot)?;
    }

    // Старый снапшот держит старый корень, новый видит новое значение.
    assert_eq!(old_reader.try_get(&k.as_path()).unwrap(), b"v1");
    assert_eq!(old_reader.metadata().0, 1);

    let new_reader = db.begin_read_only();
    assert_eq!(new_reader.try_get(&k.as_path()).unwrap(), b"v2-bigger");
    assert_eq!(new_reader.metadata().0, 2);
    Ok(())
}

// Много коммитов подряд: каждый новый read-батч видит ровно своё состояние,
// данные не рвутся переиспользованием страниц внутри окна реорганизации.
#[test]
fn snapshots_are_consistent_across_many_batches() -> Result<()> {
    let db = PagedDb::open_memory(4, 8 * 1024 * 1024)?;
    let addr = H256::repeat_byte(0x33);
    let k = key::account_key(&addr);

    for n in 1..=20u32 {
        let batch = db.begin_next()?;
        batch.set_raw(&k.as_path(), &n.to_le_bytes())?;
        // Шум, чтобы аллокатор крутил CoW и abandoned-цепочки.
        for i in 0..50u8 {
            let noisy = H256::repeat_byte(i);
            batch.set_raw(&key::storage_key(&addr, &noisy).as_path(), &[n as u8, i])?;
        }
        batch.set_metadata(n, H256::repeat_byte(n as u8));
        batch.commit(CommitOptions::FlushDataAndRoot)?;

        let reader = db.begin_read_only();
        assert_eq!(reader.metadata().0, n);
        assert_eq!(reader.try_get(&k.as_path()).unwrap(), n.to_le_bytes());
    }
    Ok(())
}
