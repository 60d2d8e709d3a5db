/*
                                1  1  1  1  1  1
  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                      ID                       |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    QDCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    ANCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    NSCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    ARCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
 */

use bytes::{BufMut, Bytes, BytesMut};
use nom::{
    combinator::map,
    multi::length_data,
    number::complete::{be_u16, be_u32},
    sequence::tuple,
};
use std::ops::Range;

use nom::bits::complete::take;

use crate::error::{DnsError, Result};
use crate::name::{decode_name, encode_name, CompressionContext};

pub const DNS_HDR_SIZE: usize = 12;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub qr: u8,
    pub opcode: u8,
    pub aa: u8,
    pub tc: u8,
    pub rd: u8,
    pub ra: u8,
    pub z: u8,
    pub rcode: u8,
}

impl Flags {
    /// Standard recursive query: only RD set.
    pub fn query() -> Self {
        Flags {
            rd: 1,
            ..Flags::default()
        }
    }

    /// Packs the flags into the big-endian word at offset 2. Fields wider than
    /// their slot are masked, not rejected.
    pub fn compress_u16(&self) -> u16 {
        let flags_h: u8 = ((self.qr & 0x1) << 7)
            | ((self.opcode & 0xF) << 3)
            | ((self.aa & 0x1) << 2)
            | ((self.tc & 0x1) << 1)
            | (self.rd & 0x1);
        let flags_l: u8 = ((self.ra & 0x1) << 7) | ((self.z & 0x7) << 4) | (self.rcode & 0xF);

        (flags_h as u16) << 8 | (flags_l as u16)
    }

    fn parse_flags(input: (&[u8], usize)) -> nom::IResult<(&[u8], usize), Flags> {
        map(
            tuple((
                take(1u8),
                take(4u8),
                take(1u8),
                take(1u8),
                take(1u8),
                take(1u8),
                take(3u8),
                take(4u8),
            )),
            |(qr, opcode, aa, tc, rd, ra, z, rcode): (u8, u8, u8, u8, u8, u8, u8, u8)| Flags {
                qr,
                opcode,
                aa,
                tc,
                rd,
                ra,
                z,
                rcode,
            },
        )(input)
    }
}

#[repr(u8)]
#[allow(dead_code)]
pub enum OpCode {
    QUERY = 0,
    IQUERY = 1,
    STATUS = 2,
}

#[repr(u8)]
#[allow(dead_code)]
pub enum RCode {
    OK = 0,
    FmtError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: Flags,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < DNS_HDR_SIZE {
            return Err(DnsError::TruncatedInput { offset: buf.len() });
        }

        let (_, header) = Self::parse(buf).map_err(|_| DnsError::TruncatedInput { offset: 0 })?;
        Ok(header)
    }

    fn parse(buf: &[u8]) -> nom::IResult<&[u8], Self> {
        map(
            tuple((
                be_u16,
                nom::bits::bits(Flags::parse_flags),
                be_u16,
                be_u16,
                be_u16,
                be_u16,
            )),
            |(id, flags, qdcount, ancount, nscount, arcount)| Header {
                id,
                flags,
                qdcount,
                ancount,
                nscount,
                arcount,
            },
        )(buf)
    }

    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u16(self.id);
        buf.put_u16(self.flags.compress_u16());
        buf.put_u16(self.qdcount);
        buf.put_u16(self.ancount);
        buf.put_u16(self.nscount);
        buf.put_u16(self.arcount);
    }
}

fn question_fields(input: &[u8]) -> nom::IResult<&[u8], (u16, u16)> {
    tuple((be_u16, be_u16))(input)
}

fn answer_fields(input: &[u8]) -> nom::IResult<&[u8], (u16, u16, u32, &[u8])> {
    tuple((be_u16, be_u16, be_u32, length_data(be_u16)))(input)
}

/// Runs a fixed-width field parser at `offset`, returning its output and the
/// offset right after what it consumed.
fn parse_at<'a, O>(
    buf: &'a [u8],
    offset: usize,
    parser: fn(&'a [u8]) -> nom::IResult<&'a [u8], O>,
) -> Result<(O, usize)> {
    let input = buf
        .get(offset..)
        .ok_or(DnsError::TruncatedInput { offset })?;
    let (rest, out) = parser(input).map_err(|_| DnsError::TruncatedInput { offset })?;

    Ok((out, buf.len() - rest.len()))
}

/*
1  1  1  1  1  1
0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                                               |
/                     QNAME                     /
/                                               /
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     QTYPE                     |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     QCLASS                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum RRType {
    A = 1,      // Host Address
    NS = 2,     //an authoritative name server
    CNAME = 5,  //the canonical name for an alias
    SOA = 6,    //marks the start of a zone of authority
    PTR = 12,   // a domain name pointer
    MX = 15,    // mail exchange
    TXT = 16,   // text strings
    AAAA = 28,  // IPv6 host address
}

#[repr(u16)]
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum RRClass {
    IN = 1, // the Internet
    CS = 2, // the CSNET class (Obsolete - used only for examples in some obsolete RFCs)
    CH = 3, // the CHAOS class
    HS = 4, // Hesiod [Dyer 87]
}

impl Question {
    #[allow(dead_code)]
    pub fn new(name: impl Into<String>, qtype: RRType, qclass: RRClass) -> Self {
        Question {
            name: name.into(),
            qtype: qtype as u16,
            qclass: qclass as u16,
        }
    }

    /// Decodes the question at `offset`, returning it with the number of bytes
    /// it occupies there. A compressed name counts as its 2 pointer bytes.
    pub fn from_bytes(buf: &[u8], offset: usize) -> Result<(Self, usize)> {
        let (name, after_name) = decode_name(buf, offset)?;
        let ((qtype, qclass), end) = parse_at(buf, after_name, question_fields)?;

        Ok((
            Question {
                name,
                qtype,
                qclass,
            },
            end - offset,
        ))
    }

    /// Appends the question at message offset `pos`; returns the offset after it.
    pub fn to_bytes(
        &self,
        buf: &mut BytesMut,
        ctx: &mut CompressionContext,
        pos: usize,
    ) -> Result<usize> {
        let pos = encode_name(&self.name, ctx, pos, buf)?;
        buf.put_u16(self.qtype);
        buf.put_u16(self.qclass);
        Ok(pos + 4)
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.name.to_ascii_lowercase(), self.qtype)
    }
}

/*
0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                                               |
/                                               /
/                      NAME                     /
|                                               |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                      TYPE                     |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     CLASS                     |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                      TTL                      |
|                                               |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                   RDLENGTH                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
/                     RDATA                     /
/                                               /
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Bytes,
}

impl Answer {
    #[allow(dead_code)]
    pub fn new(
        name: impl Into<String>,
        rtype: RRType,
        class: RRClass,
        ttl: u32,
        data: &[u8],
    ) -> Self {
        Answer {
            name: name.into(),
            rtype: rtype as u16,
            class: class as u16,
            ttl,
            rdata: Bytes::copy_from_slice(data),
        }
    }

    /// Decodes the record at `offset`; rdata is kept opaque.
    pub fn from_bytes(buf: &[u8], offset: usize) -> Result<(Self, usize)> {
        let (name, after_name) = decode_name(buf, offset)?;
        let ((rtype, class, ttl, rdata), end) = parse_at(buf, after_name, answer_fields)?;

        Ok((
            Answer {
                name,
                rtype,
                class,
                ttl,
                rdata: Bytes::copy_from_slice(rdata),
            },
            end - offset,
        ))
    }

    pub fn to_bytes(
        &self,
        buf: &mut BytesMut,
        ctx: &mut CompressionContext,
        pos: usize,
    ) -> Result<usize> {
        let pos = encode_name(&self.name, ctx, pos, buf)?;
        buf.put_u16(self.rtype);
        buf.put_u16(self.class);
        buf.put_u32(self.ttl);
        buf.put_u16(self.rdata.len() as u16);
        buf.extend_from_slice(&self.rdata);
        Ok(pos + 10 + self.rdata.len())
    }
}

/// Header plus question section; answers are carried only when building.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Answer>,
}

impl Message {
    pub fn new(id: u16, flags: Flags, questions: Vec<Question>, answers: Vec<Answer>) -> Self {
        Message {
            header: Header {
                id,
                flags,
                qdcount: questions.len() as u16,
                ancount: answers.len() as u16,
                nscount: 0,
                arcount: 0,
            },
            questions,
            answers,
        }
    }

    /// Decodes the header and the `qdcount` questions that follow it.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let mut offset = DNS_HDR_SIZE;
        let mut questions = Vec::new();

        for _ in 0..header.qdcount {
            let (question, consumed) = Question::from_bytes(buf, offset)?;
            questions.push(question);
            offset += consumed;
        }

        Ok(Message {
            header,
            questions,
            answers: vec![],
        })
    }

    /// Encodes the whole message with one compression context.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(512);
        let mut ctx = CompressionContext::new();

        self.header.to_bytes(&mut buf);

        let mut pos = DNS_HDR_SIZE;
        for q in self.questions.iter() {
            pos = q.to_bytes(&mut buf, &mut ctx, pos)?;
        }

        for a in self.answers.iter() {
            pos = a.to_bytes(&mut buf, &mut ctx, pos)?;
        }

        Ok(buf.freeze())
    }
}

fn answer_section_range(buf: &[u8], header: &Header) -> Result<Range<usize>> {
    let mut offset = DNS_HDR_SIZE;
    for _ in 0..header.qdcount {
        let (_, consumed) = Question::from_bytes(buf, offset)?;
        offset += consumed;
    }

    let start = offset;
    for _ in 0..header.ancount {
        let (_, consumed) = Answer::from_bytes(buf, offset)?;
        offset += consumed;
    }

    Ok(start..offset)
}

/// The exact bytes of the answer section of `buf`, as sent. Any compression
/// pointers inside still refer to offsets in `buf`.
pub fn answer_section<'a>(buf: &'a [u8], header: &Header) -> Result<&'a [u8]> {
    let range = answer_section_range(buf, header)?;
    Ok(&buf[range])
}

pub fn decode_answers(buf: &[u8], header: &Header) -> Result<Vec<Answer>> {
    let range = answer_section_range(buf, header)?;
    let mut offset = range.start;
    let mut answers = Vec::new();

    while offset < range.end {
        let (answer, consumed) = Answer::from_bytes(buf, offset)?;
        answers.push(answer);
        offset += consumed;
    }

    Ok(answers)
}
