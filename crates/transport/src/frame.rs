use snafu::ResultExt;

use super::error::{DecodeFrameSnafu, TransportResult};
use super::protocol::FramePayload;

/// Field marker for the payload line inside a frame.
const DATA_FIELD_PREFIX: &[u8] = b"data:";

/// One complete frame, reduced to its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Parses the payload as a [`FramePayload`]. Invalid UTF-8 is a decode
    /// error like any other malformed payload.
    pub fn decode(&self) -> TransportResult<FramePayload> {
        serde_json::from_slice(&self.data).with_context(|_| DecodeFrameSnafu {
            stage: "decode-frame-payload",
            data: String::from_utf8_lossy(&self.data).into_owned(),
        })
    }
}

/// Incremental decoder for blank-line delimited frames.
///
/// Lines end with `\n`, `\r\n` or a lone `\r`, mixed freely; two line
/// endings in a row close a frame. Output depends only on the byte
/// sequence, never on how it was split into chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    // Everything before this index has been ruled out as a separator start.
    scan_from: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut frame_start = 0;
        let mut scan = self.scan_from;

        while let Some((body_end, next_start)) = find_blank_line(&self.buffer, scan) {
            if let Some(frame) = parse_frame(&self.buffer[frame_start..body_end]) {
                frames.push(frame);
            }
            frame_start = next_start;
            scan = next_start;
        }

        self.buffer.drain(..frame_start);
        // A separator may still complete from the last two bytes once more data arrives.
        self.scan_from = self.buffer.len().saturating_sub(2);
        frames
    }

    /// Number of bytes held back waiting for a separator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Finds the first blank line at or after `from`.
///
/// Returns the end of the frame body and the index right after the separator.
/// A `\r` closing the buffer may still gain a `\n`; that byte then opens the
/// next frame as an empty line, which parses to nothing.
fn find_blank_line(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buffer.len()).find_map(|index| {
        let first = line_ending_len(buffer, index)?;
        let second = line_ending_len(buffer, index + first)?;
        Some((index, index + first + second))
    })
}

fn line_ending_len(buffer: &[u8], index: usize) -> Option<usize> {
    match (buffer.get(index), buffer.get(index + 1)) {
        (Some(b'\r'), Some(b'\n')) => Some(2),
        (Some(b'\r' | b'\n'), _) => Some(1),
        _ => None,
    }
}

fn split_lines(body: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while index < body.len() {
        if let Some(ending) = line_ending_len(body, index) {
            lines.push(&body[start..index]);
            index += ending;
            start = index;
        } else {
            index += 1;
        }
    }
    lines.push(&body[start..]);
    lines
}

fn parse_frame(body: &[u8]) -> Option<Frame> {
    let mut data: Option<Vec<u8>> = None;

    for line in split_lines(body) {
        let Some(value) = line.strip_prefix(DATA_FIELD_PREFIX) else {
            continue;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        match data.as_mut() {
            Some(data) => {
                data.push(b'\n');
                data.extend_from_slice(value);
            }
            None => data = Some(value.to_vec()),
        }
    }

    data.map(Frame::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED_STREAM: &str = concat!(
        ": keep-alive\n\n",
        "event: message\r\ndata: {\"chunk\":\"héllo ✓\"}\r\n\r\n",
        "data:{\"chunk\":\"B\"}\n\n",
        "id: 7\ndata: {\"chunk\":\"line one\"\ndata: }\n\n",
        "data:{\"chunk\":\"cr\"}\r\r",
        "data:{\"done\":true,\"sessionId\":\"s1\"}\n\n",
        "data:{\"chunk\":\"tail\"",
    );

    fn decode_whole(input: &[u8]) -> Vec<Frame> {
        FrameDecoder::new().feed(input)
    }

    #[test]
    fn whole_stream_yields_expected_frames() {
        assert_eq!(
            decode_whole(MIXED_STREAM.as_bytes()),
            vec![
                Frame::new("{\"chunk\":\"héllo ✓\"}"),
                Frame::new("{\"chunk\":\"B\"}"),
                Frame::new("{\"chunk\":\"line one\"\n}"),
                Frame::new("{\"chunk\":\"cr\"}"),
                Frame::new("{\"done\":true,\"sessionId\":\"s1\"}"),
            ]
        );
    }

    #[test]
    fn every_two_way_split_matches_whole_stream() {
        let bytes = MIXED_STREAM.as_bytes();
        let expected = decode_whole(bytes);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.feed(&bytes[..split]);
            frames.extend(decoder.feed(&bytes[split..]));
            assert_eq!(frames, expected, "split at byte {split}");
            assert_eq!(decoder.pending_len(), "data:{\"chunk\":\"tail\"".len());
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_stream() {
        let bytes = MIXED_STREAM.as_bytes();
        let mut decoder = FrameDecoder::new();
        let frames = bytes
            .iter()
            .flat_map(|byte| decoder.feed(std::slice::from_ref(byte)))
            .collect::<Vec<_>>();

        assert_eq!(frames, decode_whole(bytes));
    }

    #[test]
    fn three_way_splits_inside_separators_match_whole_stream() {
        let bytes = b"data:{\"chunk\":\"A\"}\r\n\r\ndata:{\"chunk\":\"B\"}\n\ndata:{\"done\":true}\n\n";
        let expected = decode_whole(bytes);
        assert_eq!(expected.len(), 3);

        for first in 0..=bytes.len() {
            for second in first..=bytes.len() {
                let mut decoder = FrameDecoder::new();
                let mut frames = decoder.feed(&bytes[..first]);
                frames.extend(decoder.feed(&bytes[first..second]));
                frames.extend(decoder.feed(&bytes[second..]));
                assert_eq!(frames, expected, "splits at {first}/{second}");
                assert_eq!(decoder.pending_len(), 0);
            }
        }
    }

    #[test]
    fn carriage_return_line_endings_close_frames() {
        let frames = decode_whole(b"event: a\rdata:{\"chunk\":\"A\"}\r\rdata:{\"chunk\":\"B\"}\r\n\n");
        assert_eq!(
            frames,
            vec![Frame::new("{\"chunk\":\"A\"}"), Frame::new("{\"chunk\":\"B\"}")]
        );
    }

    #[test]
    fn frames_without_data_lines_are_skipped() {
        let frames = decode_whole(b"event: ping\n\n: comment\n\n\n\ndata:{}\n\n");
        assert_eq!(frames, vec![Frame::new("{}")]);
    }

    #[test]
    fn decode_reports_malformed_payload() {
        let frame = Frame::new("{\"chunk\":");
        let error = frame.decode().unwrap_err();
        assert!(matches!(error, crate::TransportError::DecodeFrame { .. }));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let frames = decode_whole(b"data:{\"chunk\":\"\xff\xfe\"}\n\n");
        assert_eq!(frames.len(), 1);

        let error = frames[0].decode().unwrap_err();
        assert!(matches!(error, crate::TransportError::DecodeFrame { .. }));
    }

    #[test]
    fn decode_reads_terminal_frame() {
        let payload = Frame::new("{\"done\":true,\"sessionId\":\"s1\",\"turnId\":\"t1\"}")
            .decode()
            .unwrap();
        assert!(payload.done);
        assert_eq!(payload.session_id.as_deref(), Some("s1"));
        assert_eq!(payload.turn_id.as_deref(), Some("t1"));
    }
}
