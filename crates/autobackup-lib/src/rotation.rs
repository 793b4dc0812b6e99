use crate::retention::{count_generations, find_oldest_generation, list_generations, slot_of};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Picks the rotation slot for the next generation of `source_name`.
///
/// Slots are handed out as `0, 1, .., copies_limit - 1` while generations
/// accumulate. Once `copies_limit` generations exist, the oldest one is
/// deleted and its slot is reused. If more than `copies_limit` generations
/// exist (the limit was lowered), the oldest are evicted until one slot is
/// free. The returned slot is always below `copies_limit`.
pub fn next_slot(destination_dir: &Path, source_name: &str, copies_limit: u32) -> io::Result<u32> {
    let limit = copies_limit.max(1) as usize;
    let mut count = count_generations(destination_dir, source_name)?;
    if count < limit {
        debug!(
            "{} has {} of {} generations, using slot {}",
            source_name, count, limit, count
        );
        return Ok(count as u32);
    }

    let mut slot = 0;
    while count >= limit {
        let oldest = find_oldest_generation(destination_dir, source_name)?;
        slot = slot_of(&oldest).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Generation {:?} has no rotation slot", oldest),
            )
        })?;
        evict(&oldest)?;
        count -= 1;
    }
    if (slot as usize) < limit {
        return Ok(slot);
    }

    // The evicted slot is out of range after a lowered limit
    let used: BTreeSet<u32> = list_generations(destination_dir, source_name)?
        .into_iter()
        .map(|g| g.slot)
        .collect();
    let free = (0..limit as u32).find(|s| !used.contains(s)).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("No free rotation slot for {}", source_name),
        )
    })?;
    debug!(
        "Slot {} of {} is above the limit of {}, using slot {}",
        slot, source_name, limit, free
    );
    Ok(free)
}

/// Deletes one generation: a directory tree or an archive file.
pub fn evict(generation: &Path) -> io::Result<()> {
    info!("Evicting oldest generation {:?}", generation);
    if generation.is_dir() {
        fs::remove_dir_all(generation)
    } else {
        fs::remove_file(generation)
    }
}
