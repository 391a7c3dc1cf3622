//! Index-based byte arena backing the auxiliary table and stub buffers.
//! Arenas are a growable list of chunks; blocks are `(arena, offset, size)`
//! value records kept in an ordered list plus a size-bucketed free list, so
//! no block ever needs a pointer back to its arena. The relaxation driver
//! frees and re-allocates stub buffers every time a table changes size, so
//! released blocks must actually get reused.

const CHUNK_SIZE: usize = 64 * 1024;
const NUM_BUCKETS: usize = 24;

/// Handle to a block owned by a [`ByteArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef(u32);

#[derive(Debug, Clone, Copy)]
struct Block {
    arena: u32,
    offset: u32,
    size: u32,
    free: bool,
}

#[derive(Debug, Default)]
pub struct ByteArena {
    arenas: Vec<Vec<u8>>,
    /// Bytes handed out from the last arena.
    cursor: usize,
    blocks: Vec<Block>,
    /// `buckets[i]` holds free blocks of size in `[2^i, 2^(i+1))`.
    buckets: [Vec<BlockRef>; NUM_BUCKETS],
}

fn bucket_for(size: usize) -> usize {
    debug_assert!(size > 0);
    ((usize::BITS - 1 - size.leading_zeros()) as usize).min(NUM_BUCKETS - 1)
}

impl ByteArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zeroed block of `size` bytes, reusing a freed block when
    /// one of sufficient size exists.
    pub fn alloc(&mut self, size: usize) -> BlockRef {
        assert!(size > 0, "Zero-sized arena blocks are not allocated");

        // First-fit within the buckets that can hold `size`. A block in
        // bucket i is at least 2^i bytes, so starting from the bucket of
        // `size` itself is enough; smaller entries in that bucket are
        // skipped by the size test.
        for bucket in bucket_for(size)..NUM_BUCKETS {
            if let Some(pos) = self.buckets[bucket]
                .iter()
                .position(|r| self.blocks[r.0 as usize].size as usize >= size)
            {
                let block_ref = self.buckets[bucket].swap_remove(pos);
                let block = &mut self.blocks[block_ref.0 as usize];
                block.free = false;
                let (arena, offset, len) =
                    (block.arena as usize, block.offset as usize, block.size as usize);
                self.arenas[arena][offset..offset + len].fill(0);
                return block_ref;
            }
        }

        let (arena, offset) = self.reserve(size);
        let block_ref = BlockRef(self.blocks.len() as u32);
        self.blocks.push(Block {
            arena: arena as u32,
            offset: offset as u32,
            size: size as u32,
            free: false,
        });
        block_ref
    }

    /// Returns the block to the free list. The handle must not be used
    /// again until `alloc` hands it back out.
    pub fn free(&mut self, block_ref: BlockRef) {
        let block = &mut self.blocks[block_ref.0 as usize];
        debug_assert!(!block.free, "Double free of arena block");
        block.free = true;
        self.buckets[bucket_for(block.size as usize)].push(block_ref);
    }

    #[must_use]
    pub fn bytes(&self, block_ref: BlockRef) -> &[u8] {
        let block = &self.blocks[block_ref.0 as usize];
        debug_assert!(!block.free);
        let offset = block.offset as usize;
        &self.arenas[block.arena as usize][offset..offset + block.size as usize]
    }

    pub fn bytes_mut(&mut self, block_ref: BlockRef) -> &mut [u8] {
        let block = &self.blocks[block_ref.0 as usize];
        debug_assert!(!block.free);
        let offset = block.offset as usize;
        &mut self.arenas[block.arena as usize][offset..offset + block.size as usize]
    }

    #[must_use]
    pub fn block_size(&self, block_ref: BlockRef) -> usize {
        self.blocks[block_ref.0 as usize].size as usize
    }

    fn reserve(&mut self, size: usize) -> (usize, usize) {
        // Oversized blocks get a dedicated arena so chunk-tail waste stays
        // bounded.
        if size > CHUNK_SIZE {
            self.arenas.push(vec![0; size]);
            self.cursor = size;
            return (self.arenas.len() - 1, 0);
        }
        if self
            .arenas
            .last()
            .is_none_or(|last| self.cursor + size > last.len())
        {
            self.arenas.push(vec![0; CHUNK_SIZE]);
            self.cursor = 0;
        }
        let offset = self.cursor;
        self.cursor += size;
        (self.arenas.len() - 1, offset)
    }
}
