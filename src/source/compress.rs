use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Plain,
    Gzip,
    Zstd,
}

pub fn detect_format(prefix: &[u8]) -> CompressionFormat {
    if prefix.starts_with(&ZSTD_MAGIC) {
        CompressionFormat::Zstd
    } else if prefix.starts_with(&GZIP_MAGIC) {
        CompressionFormat::Gzip
    } else {
        CompressionFormat::Plain
    }
}

/// Opens an input file for line reading, decompressing gzip or zstd by magic bytes.
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(path)?);
    let format = detect_format(reader.fill_buf()?);
    wrap_reader(reader, format)
}

fn wrap_reader<R: BufRead + 'static>(reader: R, format: CompressionFormat) -> io::Result<Box<dyn BufRead>> {
    Ok(match format {
        CompressionFormat::Plain => Box::new(reader),
        CompressionFormat::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(reader))),
        CompressionFormat::Zstd => Box::new(BufReader::new(zstd::stream::read::Decoder::with_buffer(
            reader,
        )?)),
    })
}

/// Reads a whole input into a string; used for the small lookup tables.
pub fn read_input_to_string(path: &Path) -> io::Result<String> {
    let mut out = String::new();
    open_input(path)?.read_to_string(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_all(path: &Path) -> String {
        read_input_to_string(path).expect("read input")
    }

    #[test]
    fn sniffs_magic_bytes() {
        assert_eq!(detect_format(&[0x1f, 0x8b, 0x08]), CompressionFormat::Gzip);
        assert_eq!(detect_format(&ZSTD_MAGIC), CompressionFormat::Zstd);
        assert_eq!(detect_format(b"!gaf-version: 2.2"), CompressionFormat::Plain);
        assert_eq!(detect_format(&[]), CompressionFormat::Plain);
    }

    #[test]
    fn reads_plain_gzip_and_zstd_inputs_identically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = "!comment\nrow\t1\n";

        let plain = dir.path().join("plain.tab");
        std::fs::write(&plain, body).expect("write plain");

        let gz = dir.path().join("rows.tab.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            std::fs::File::create(&gz).expect("create gz"),
            flate2::Compression::default(),
        );
        encoder.write_all(body.as_bytes()).expect("gz write");
        encoder.finish().expect("gz finish");

        let zst = dir.path().join("rows.tab.zst");
        let compressed = zstd::stream::encode_all(body.as_bytes(), 0).expect("zstd encode");
        std::fs::write(&zst, compressed).expect("write zst");

        assert_eq!(read_all(&plain), body);
        assert_eq!(read_all(&gz), body);
        assert_eq!(read_all(&zst), body);
    }
}
