use bytes::{Bytes, BytesMut};

use crate::dns_hdr::{answer_section, Flags, Header, Message, Question, RCode, DNS_HDR_SIZE};
use crate::error::Result;
use crate::name::CompressionContext;

/// One upstream packet per question, in question order.
///
/// A single-question query goes upstream as received. Otherwise each question
/// gets its own minimal query under the client's ID; replies are matched by
/// transport, so the ID is never checked.
pub fn split_query(packet: &Bytes, query: &Message) -> Result<Vec<Bytes>> {
    if query.questions.len() == 1 {
        return Ok(vec![packet.clone()]);
    }

    query
        .questions
        .iter()
        .map(|q| single_question_packet(query.header.id, q))
        .collect()
}

pub fn single_question_packet(id: u16, question: &Question) -> Result<Bytes> {
    let header = Header {
        id,
        flags: Flags::query(),
        qdcount: 1,
        ..Header::default()
    };

    let mut buf = BytesMut::with_capacity(512);
    let mut ctx = CompressionContext::new();
    header.to_bytes(&mut buf);
    question.to_bytes(&mut buf, &mut ctx, DNS_HDR_SIZE)?;

    Ok(buf.freeze())
}

/// Builds the client reply from one upstream response per question.
///
/// Questions are re-encoded against a fresh compression context; answer
/// sections are appended byte for byte in question order. Pointers inside
/// those answers are not rewritten and keep referring to offsets of the
/// upstream message they came from.
pub fn merge_responses(
    id: u16,
    query: &Header,
    questions: &[Question],
    responses: &[Bytes],
) -> Result<Bytes> {
    let mut sections = Vec::with_capacity(responses.len());
    let mut ancount: u16 = 0;
    let mut ra = !responses.is_empty();
    let mut rcode = RCode::OK as u8;

    for response in responses {
        let header = Header::from_bytes(response)?;
        sections.push(answer_section(response, &header)?);

        ancount = ancount.saturating_add(header.ancount);
        ra &= header.flags.ra == 1;
        if rcode == RCode::OK as u8 {
            rcode = header.flags.rcode;
        }
    }

    let header = Header {
        id,
        flags: Flags {
            qr: 1,
            opcode: query.flags.opcode,
            rd: query.flags.rd,
            ra: ra as u8,
            rcode,
            ..Flags::default()
        },
        qdcount: questions.len() as u16,
        ancount,
        nscount: 0,
        arcount: 0,
    };

    let mut buf = BytesMut::with_capacity(512);
    let mut ctx = CompressionContext::new();
    header.to_bytes(&mut buf);

    let mut pos = DNS_HDR_SIZE;
    for q in questions {
        pos = q.to_bytes(&mut buf, &mut ctx, pos)?;
    }

    for section in sections {
        buf.extend_from_slice(section);
    }

    Ok(buf.freeze())
}

/// Local reply for opcodes other than QUERY: questions echoed, no answers.
pub fn not_implemented(query: &Message) -> Result<Bytes> {
    Message::new(
        query.header.id,
        Flags {
            qr: 1,
            opcode: query.header.flags.opcode,
            rd: query.header.flags.rd,
            rcode: RCode::NotImplemented as u8,
            ..Flags::default()
        },
        query.questions.clone(),
        vec![],
    )
    .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns_hdr::{decode_answers, Answer, RRClass, RRType};

    fn upstream_reply(sub_query: &[u8], ttl: u32, rdata: &[u8]) -> Bytes {
        let query = Message::from_bytes(sub_query).unwrap();
        let answers = query
            .questions
            .iter()
            .map(|q| Answer::new(q.name.clone(), RRType::A, RRClass::IN, ttl, rdata))
            .collect();
        Message::new(
            0xBEEF,
            Flags {
                qr: 1,
                rd: 1,
                ra: 1,
                ..Flags::default()
            },
            query.questions,
            answers,
        )
        .to_bytes()
        .unwrap()
    }

    fn client_query(id: u16, names: &[&str]) -> (Bytes, Message) {
        let questions = names
            .iter()
            .map(|n| Question::new(*n, RRType::A, RRClass::IN))
            .collect();
        let packet = Message::new(id, Flags::query(), questions, vec![])
            .to_bytes()
            .unwrap();
        let message = Message::from_bytes(&packet).unwrap();
        (packet, message)
    }

    #[test]
    fn test_single_question_passes_through() {
        let (packet, query) = client_query(42, &["codecrafters.io"]);
        let packets = split_query(&packet, &query).unwrap();
        assert_eq!(packets, vec![packet]);
    }

    #[test]
    fn test_split_multi_question() {
        let (packet, query) = client_query(42, &["abc.codecrafters.io", "def.codecrafters.io"]);
        let packets = split_query(&packet, &query).unwrap();
        assert_eq!(packets.len(), 2);

        for (sub, question) in packets.iter().zip(&query.questions) {
            let message = Message::from_bytes(sub).unwrap();
            assert_eq!(message.header.id, 42);
            assert_eq!(message.header.flags.compress_u16(), 0x0100);
            assert_eq!(message.header.qdcount, 1);
            assert_eq!(message.header.ancount, 0);
            assert_eq!(message.questions, vec![question.clone()]);
            // own context: the name is never a pointer
            assert_eq!(sub.len(), DNS_HDR_SIZE + question.name.len() + 2 + 4);
        }
    }

    #[test]
    fn test_merge_preserves_order_and_counts() {
        let (packet, query) = client_query(
            0x1234,
            &["abc.codecrafters.io", "def.codecrafters.io", "ghi.codecrafters.io"],
        );
        let subs = split_query(&packet, &query).unwrap();
        let responses: Vec<Bytes> = subs
            .iter()
            .enumerate()
            .map(|(i, sub)| upstream_reply(sub, 60, &[10, 0, 0, i as u8]))
            .collect();

        let reply = merge_responses(0x1234, &query.header, &query.questions, &responses).unwrap();
        let merged = Message::from_bytes(&reply).unwrap();

        assert_eq!(merged.header.id, 0x1234);
        assert_eq!(merged.header.flags.qr, 1);
        assert_eq!(merged.header.flags.rd, 1);
        assert_eq!(merged.header.flags.ra, 1);
        assert_eq!(merged.header.qdcount, 3);
        assert_eq!(merged.header.ancount, 3);
        assert_eq!(merged.questions, query.questions);

        let rdata: Vec<Bytes> = decode_answers(&reply, &merged.header)
            .unwrap()
            .into_iter()
            .map(|a| a.rdata)
            .collect();
        assert_eq!(
            rdata,
            vec![
                Bytes::from_static(&[10, 0, 0, 0]),
                Bytes::from_static(&[10, 0, 0, 1]),
                Bytes::from_static(&[10, 0, 0, 2]),
            ]
        );
    }

    #[test]
    fn test_merge_shares_one_compression_context() {
        let (packet, query) = client_query(1, &["abc.codecrafters.io", "def.codecrafters.io"]);
        let responses: Vec<Bytes> = split_query(&packet, &query)
            .unwrap()
            .iter()
            .map(|sub| upstream_reply(sub, 60, &[1, 2, 3, 4]))
            .collect();

        let reply = merge_responses(1, &query.header, &query.questions, &responses).unwrap();

        // second question: "def" + pointer to "codecrafters.io" in the first
        let second = DNS_HDR_SIZE + "abc.codecrafters.io".len() + 2 + 4;
        assert_eq!(&reply[second..second + 6], &[3, b'd', b'e', b'f', 0xC0, 16]);
    }

    #[test]
    fn test_merge_sums_answer_counts() {
        let (packet, query) = client_query(9, &["a.example", "b.example"]);
        let subs = split_query(&packet, &query).unwrap();

        let empty = {
            let sub = Message::from_bytes(&subs[0]).unwrap();
            Message::new(
                sub.header.id,
                Flags {
                    qr: 1,
                    rcode: RCode::NameError as u8,
                    ..Flags::default()
                },
                sub.questions,
                vec![],
            )
            .to_bytes()
            .unwrap()
        };
        let full = upstream_reply(&subs[1], 30, &[9, 9, 9, 9]);

        let reply = merge_responses(9, &query.header, &query.questions, &[empty, full]).unwrap();
        let header = Header::from_bytes(&reply).unwrap();
        assert_eq!(header.qdcount, 2);
        assert_eq!(header.ancount, 1);
        assert_eq!(header.flags.rcode, RCode::NameError as u8);
        assert_eq!(header.flags.ra, 0);
    }

    #[test]
    fn test_merge_rejects_malformed_response() {
        let (_, query) = client_query(1, &["codecrafters.io"]);
        let malformed = [Bytes::from_static(&[0; 5])];
        let result = merge_responses(1, &query.header, &query.questions, &malformed);
        assert!(result.is_err());
    }

    #[test]
    fn test_not_implemented_reply() {
        let query = Message::new(
            77,
            Flags {
                opcode: 2,
                rd: 1,
                ..Flags::default()
            },
            vec![Question::new("codecrafters.io", RRType::A, RRClass::IN)],
            vec![],
        );

        let reply = Message::from_bytes(&not_implemented(&query).unwrap()).unwrap();
        assert_eq!(reply.header.id, 77);
        assert_eq!(reply.header.flags.qr, 1);
        assert_eq!(reply.header.flags.opcode, 2);
        assert_eq!(reply.header.flags.rcode, RCode::NotImplemented as u8);
        assert_eq!(reply.header.ancount, 0);
        assert_eq!(reply.questions, query.questions);
    }
}
