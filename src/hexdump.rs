//! Hexdump serializer for captured NVM sections.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::Error;

/// Bytes rendered per line.
pub const DEFAULT_LINE_WIDTH: usize = 16;

/// Writes a hexdump of `data` to `path` as UTF-8 text.
pub fn save_hexdump(
    data: &[u8],
    start_addr: u32,
    path: &Path,
    line_width: usize,
) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    write_hexdump(&mut out, data, start_addr, line_width)?;
    out.flush()?;

    info!("wrote {} byte hexdump to {}", data.len(), path.display());
    Ok(())
}

/// Renders `data` as hexdump lines: offset, hex column, decimal column and a
/// printable-ASCII gutter. The data columns are padded so a short final line
/// keeps them aligned.
pub fn write_hexdump<W: Write>(
    out: &mut W,
    data: &[u8],
    start_addr: u32,
    line_width: usize,
) -> Result<(), Error> {
    if line_width == 0 {
        return Err(Error::InvalidArgument("line width must be non-zero"));
    }

    let hex_width = line_width * 3 - 1;
    let dec_width = line_width * 4;

    for (index, chunk) in data.chunks(line_width).enumerate() {
        let offset = start_addr as usize + index * line_width;

        let hex_bytes = chunk
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let dec_bytes = chunk
            .iter()
            .map(|b| format!("{:3}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk.iter().map(|&b| gutter_char(b)).collect();

        writeln!(
            out,
            "{:08X}:  {:<hex_width$}  {:<dec_width$}  {}",
            offset,
            hex_bytes,
            dec_bytes,
            ascii,
            hex_width = hex_width,
            dec_width = dec_width
        )?;
    }

    Ok(())
}

/// Printable ASCII passes through; control bytes (tab, newline and carriage
/// return included) and anything past 0x7E become dots.
fn gutter_char(byte: u8) -> char {
    if byte == b' ' || byte.is_ascii_graphic() {
        byte as char
    } else {
        '.'
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    fn dump_to_string(data: &[u8], start_addr: u32, line_width: usize) -> String {
        let mut out = Vec::new();
        write_hexdump(&mut out, data, start_addr, line_width).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn it_should_format_a_short_line_with_padded_columns() {
        let text = dump_to_string(&hex!("00 41 FF"), 0x1000, 16);
        let expected = format!("00001000:  {:<47}  {:<64}  .A.\n", "00 41 FF", "  0  65 255");

        assert_eq!(text, expected);
    }

    #[test]
    fn it_should_advance_offsets_by_the_line_width() {
        let text = dump_to_string(&[0u8; 40], 0x2000, 16);
        let offsets: Vec<&str> = text.lines().map(|line| &line[..9]).collect();

        assert_eq!(offsets, vec!["00002000:", "00002010:", "00002020:"]);
    }

    #[test]
    fn it_should_dot_out_non_printable_bytes() {
        let text = dump_to_string(b"\x09\x0A\x0D A~\x7F", 0, 16);

        assert!(text.trim_end().ends_with("... A~."));
    }

    #[test]
    fn it_should_parse_back_from_the_hex_column() {
        let data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let text = dump_to_string(&data, 0, 16);

        let mut parsed = Vec::new();
        for line in text.lines() {
            let hex_column = &line[11..11 + 47];
            for token in hex_column.split_whitespace() {
                parsed.push(u8::from_str_radix(token, 16).unwrap());
            }
        }

        assert_eq!(parsed, data);
    }

    #[test]
    fn it_should_honor_a_custom_line_width() {
        let text = dump_to_string(&hex!("01 02 03 04 05"), 0, 4);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000:  01 02 03 04"));
        assert!(lines[1].starts_with("00000004:  05"));
    }
}
