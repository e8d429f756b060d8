use std::io::Write;

use crate::error::Result;
use crate::interval::Interval;
use crate::reader::D4Reader;

/// Number of intervals fetched per read
const BATCH_SIZE: usize = 4096;

/// Writes every run of the file as a bedGraph line: `chrom\tleft\tright\tvalue`
///
/// Values are divided by the denominator unless it is 1. Runs are read from the start of
/// each chromosome, the reader cursor is left at the end of the last chromosome.
pub fn write_bedgraph<W: Write>(reader: &mut D4Reader, out: &mut W) -> Result<()> {
    let denominator = reader.metadata().denominator();
    let scaled = (denominator - 1.0).abs() > f64::EPSILON;
    let names: Vec<String> = reader
        .metadata()
        .chroms()
        .iter()
        .map(|c| c.name.clone())
        .collect();

    // reusable buffer for formatting integers
    let mut itoa_buf = itoa::Buffer::new();
    let mut batch = vec![Interval::default(); BATCH_SIZE];
    for name in &names {
        reader.seek(name, 0)?;
        loop {
            let n = reader.read_intervals(&mut batch)?;
            if n == 0 {
                break;
            }
            for iv in &batch[..n] {
                out.write_all(name.as_bytes())?;
                out.write_all(b"\t")?;
                out.write_all(itoa_buf.format(iv.left).as_bytes())?;
                out.write_all(b"\t")?;
                out.write_all(itoa_buf.format(iv.right).as_bytes())?;
                out.write_all(b"\t")?;
                if scaled {
                    write!(out, "{}", f64::from(iv.value) / denominator)?;
                } else {
                    out.write_all(itoa_buf.format(iv.value).as_bytes())?;
                }
                out.write_all(b"\n")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
