// Страницы
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HDR_SIZE: usize = 8; // [batch_id u32][version u8][type u8][level u8][metadata u8]
pub const PAGE_VERSION: u8 = 1;

// Типы страниц (header.page_type)
pub const PAGE_TYPE_ROOT: u8 = 1;
pub const PAGE_TYPE_ABANDONED: u8 = 2;
pub const PAGE_TYPE_DATA: u8 = 3;
pub const PAGE_TYPE_BOTTOM: u8 = 4;
pub const PAGE_TYPE_LEAF_OVERFLOW: u8 = 5;

// Режим data-страницы (header.metadata)
pub const PAGE_MODE_FANOUT: u8 = 0;
pub const PAGE_MODE_LEAF: u8 = 1;

// Адресация: u32-индекс страницы в файле. Страница 0 всегда занята
// root-кольцом, поэтому 0 служит sentinel-ом «нет страницы».
pub const ADDR_NULL: u32 = 0;
pub const ADDR_SIZE: usize = 4;

// Nibble fan-out
pub const BUCKET_COUNT: usize = 16;
pub const BUCKETS_BYTES: usize = BUCKET_COUNT * ADDR_SIZE;

// Смещение slotted-области в data/bottom-страницах:
// header (8) + 16 child-адресов (64). Leaf-режим использует buckets[0]
// как адрес overflow-страницы, остальные держит нулевыми — раскладка
// одинакова в обоих режимах и не перестраивается при смене режима.
pub const DATA_SLOTTED_OFF: usize = PAGE_HDR_SIZE + BUCKETS_BYTES;

// LeafOverflow: только slotted-область после заголовка.
pub const OVERFLOW_SLOTTED_OFF: usize = PAGE_HDR_SIZE;

// Root-кольцо: страницы 0..R-1, слот для батча b = b mod R.
// Верхняя граница R диктуется ёмкостью abandoned-таблицы в root-странице.
pub const MAX_REORG_DEPTH_LIMIT: u32 = 32;

// Раскладка payload root-страницы (после общего 8-байтового заголовка, LE):
// [block_number u32][block_hash 32B][tree_root u32][page_count u32]
// [abandoned_count u32][entries (batch_id u32, head u32) x 32]
// [crc32 u32]  -- crc32fast по всей странице с обнулённым полем CRC
pub const ROOT_OFF_BLOCK_NUMBER: usize = 8;
pub const ROOT_OFF_BLOCK_HASH: usize = 12;
pub const ROOT_OFF_TREE_ROOT: usize = 44;
pub const ROOT_OFF_PAGE_COUNT: usize = 48;
pub const ROOT_OFF_ABANDONED_COUNT: usize = 52;
pub const ROOT_OFF_ABANDONED: usize = 56;
pub const ROOT_ABANDONED_ENTRY_SIZE: usize = 8;
pub const ROOT_OFF_CRC: usize =
    ROOT_OFF_ABANDONED + MAX_REORG_DEPTH_LIMIT as usize * ROOT_ABANDONED_ENTRY_SIZE; // 312

// Abandoned-страница: [next u32][count u32][page_id u32 x cap]
pub const AB_OFF_NEXT: usize = 8;
pub const AB_OFF_COUNT: usize = 12;
pub const AB_OFF_IDS: usize = 16;
pub const AB_CAPACITY: usize = (PAGE_SIZE - AB_OFF_IDS) / ADDR_SIZE; // 1020
