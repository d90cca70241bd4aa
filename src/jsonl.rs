use std::io::{BufRead, Read, Write};

use anyhow::{bail, Context};
use serde::Serialize;

use crate::config;
use crate::filter::pool::ParaphrasePool;
use crate::protocol::PoolRecord;

/// Read a JSON Lines pool: one `{"source", "candidates"}` object per line, blank lines ignored.
pub fn read_pool(input: &mut dyn BufRead) -> anyhow::Result<ParaphrasePool> {
    read_pool_capped(input, config::input::MAX_LINE_BYTES)
}

fn read_pool_capped(input: &mut dyn BufRead, max_line_bytes: usize) -> anyhow::Result<ParaphrasePool> {
    let mut pool = ParaphrasePool::new();
    let mut line = Vec::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        // Never buffer more than the cap plus its newline.
        let limit = max_line_bytes as u64 + 1;
        let n = Read::take(&mut *input, limit)
            .read_until(b'\n', &mut line)
            .with_context(|| format!("failed reading pool line {}", line_no + 1))?;
        if n == 0 {
            break;
        }
        line_no += 1;

        let content_len = line.strip_suffix(b"\n").map_or(line.len(), <[u8]>::len);
        if content_len > max_line_bytes {
            bail!("pool line {line_no} too large: over {max_line_bytes} bytes");
        }
        let text = std::str::from_utf8(&line).with_context(|| format!("pool line {line_no} is not valid UTF-8"))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: PoolRecord =
            serde_json::from_str(trimmed).with_context(|| format!("invalid pool record on line {line_no}"))?;
        pool.insert(&record.source, record.candidates);
    }

    log::info!(
        "Read {} sources / {} distinct candidates from {} lines",
        pool.len(),
        pool.candidate_count(),
        line_no
    );
    Ok(pool)
}

pub fn write_record<T: Serialize>(out: &mut dyn Write, record: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, record).context("failed serializing output record")?;
    out.write_all(b"\n")?;
    Ok(())
}
