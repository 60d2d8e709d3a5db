use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use crate::dns_hdr::DNS_HDR_SIZE;
use crate::error::{DnsError, Result};

/*
 Names are a run of <len><bytes> labels ended by a zero byte, or ended early
 by a 2-byte pointer to an earlier occurrence of the remaining suffix:

  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
| 1  1|                OFFSET                   |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
 */

const POINTER_MASK: u8 = 0b1100_0000;
const MAX_POINTER_OFFSET: usize = 0x3FFF;
pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_JUMPS: usize = 10;

/// Name suffix -> offset of its first occurrence in the message being built.
///
/// One context belongs to exactly one outbound message; create it next to the
/// buffer and drop it with the buffer.
#[derive(Debug, Default)]
pub struct CompressionContext {
    offsets: HashMap<String, usize>,
}

impl CompressionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, suffix: &str) -> Option<usize> {
        self.offsets.get(suffix).copied()
    }

    fn record(&mut self, suffix: String, offset: usize) {
        if offset <= MAX_POINTER_OFFSET {
            self.offsets.entry(suffix).or_insert(offset);
        }
    }
}

fn split_labels(name: &str) -> Result<Vec<&str>> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Ok(vec![]);
    }

    name.split('.')
        .map(|label| {
            if label.is_empty() {
                Err(DnsError::EmptyLabel {
                    name: name.to_string(),
                })
            } else if label.len() > MAX_LABEL_LEN {
                Err(DnsError::LabelTooLong {
                    label: label.to_string(),
                })
            } else {
                Ok(label)
            }
        })
        .collect()
}

/// Appends `name` to `buf`, where `start` is the message offset the name
/// begins at. Returns the offset right after the name.
///
/// Every suffix written literally is recorded at the running position, so a
/// later `www.example.com` can point at the `example.com` inside an earlier
/// `mail.example.com`. Pointers only ever target `[12, start)`.
pub fn encode_name(
    name: &str,
    ctx: &mut CompressionContext,
    start: usize,
    buf: &mut BytesMut,
) -> Result<usize> {
    let labels = split_labels(name)?;
    let length = labels.iter().map(|label| 1 + label.len()).sum::<usize>() + 1;
    if length > MAX_NAME_LEN {
        return Err(DnsError::NameTooLong { length });
    }

    let mut pos = start;

    for i in 0..labels.len() {
        let suffix = labels[i..].join(".");

        if let Some(target) = ctx
            .lookup(&suffix)
            .filter(|target| (DNS_HDR_SIZE..start).contains(target))
        {
            buf.put_u16(((POINTER_MASK as u16) << 8) | target as u16);
            return Ok(pos + 2);
        }

        ctx.record(suffix, pos);

        let label = labels[i].as_bytes();
        buf.put_u8(label.len() as u8);
        buf.extend_from_slice(label);
        pos += 1 + label.len();
    }

    buf.put_u8(0);
    Ok(pos + 1)
}

/// Reads the name at `offset`, following compression pointers.
///
/// Returns the dotted name and the offset right after the bytes the name
/// physically occupies at `offset`: a pointer always ends that span after
/// its 2 bytes, wherever it jumps to.
pub fn decode_name(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len_byte = *buf
            .get(pos)
            .ok_or(DnsError::TruncatedInput { offset: pos })?;

        match len_byte & POINTER_MASK {
            POINTER_MASK => {
                let low = *buf
                    .get(pos + 1)
                    .ok_or(DnsError::TruncatedInput { offset: pos + 1 })?;
                let target = (((len_byte & !POINTER_MASK) as usize) << 8) | low as usize;

                if target < DNS_HDR_SIZE || target >= buf.len() {
                    return Err(DnsError::InvalidPointer {
                        offset: pos,
                        target,
                    });
                }

                jumps += 1;
                if jumps > MAX_JUMPS {
                    return Err(DnsError::CompressionLoop {
                        max_jumps: MAX_JUMPS,
                    });
                }

                end.get_or_insert(pos + 2);
                pos = target;
            }
            0 if len_byte == 0 => {
                let end = end.unwrap_or(pos + 1);
                return Ok((labels.join("."), end));
            }
            0 => {
                let len = len_byte as usize;
                let label = buf
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(DnsError::LabelOverrun {
                        offset: pos,
                        length: len,
                    })?;
                if let Some(i) = label.iter().position(|b| !b.is_ascii() || *b == b'.') {
                    return Err(DnsError::InvalidLabelByte {
                        offset: pos + 1 + i,
                        byte: label[i],
                    });
                }
                labels.push(label.iter().map(|&b| b as char).collect());
                pos += 1 + len;
            }
            _ => {
                return Err(DnsError::InvalidLabelType {
                    offset: pos,
                    byte: len_byte,
                })
            }
        }
    }
}
