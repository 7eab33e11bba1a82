//! Framing properties: the reader yields exactly the values written,
//! however the bytes were chunked.

use claudecode_sdk::{FramedReader, SdkError};
use serde_json::{json, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Hands out the underlying bytes `chunk_size` at a time, simulating
/// arbitrary pipe buffering.
struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.pos >= self.data.len() {
            return Poll::Ready(Ok(()));
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        buf.put_slice(&chunk);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}

async fn collect_chunked(data: &[u8], chunk_size: usize) -> Vec<Value> {
    let mut reader = FramedReader::new(ChunkedReader {
        data: data.to_vec(),
        pos: 0,
        chunk_size,
    });
    let mut values = Vec::new();
    while let Some(value) = reader.next_value().await.unwrap() {
        values.push(value);
    }
    values
}

fn sample_stream() -> (Vec<u8>, Vec<Value>) {
    let values = vec![
        json!({"type": "system", "subtype": "init", "session_id": "s"}),
        json!({"type": "assistant", "message": {"content": [
            {"type": "text", "text": "multi\nline\ntext with \"quotes\" and {braces}"},
        ]}}),
        json!({"type": "result", "subtype": "success", "num_turns": 1}),
    ];
    let mut bytes = Vec::new();
    for value in &values {
        bytes.extend_from_slice(value.to_string().as_bytes());
        bytes.push(b'\n');
    }
    (bytes, values)
}

#[tokio::test]
async fn chunk_size_does_not_change_the_parse() {
    let (bytes, expected) = sample_stream();
    for chunk_size in [1, 2, 3, 7, 16, 64, 1024, bytes.len()] {
        let values = collect_chunked(&bytes, chunk_size).await;
        assert_eq!(values, expected, "chunk_size={chunk_size}");
    }
}

#[tokio::test]
async fn objects_larger_than_pipe_capacity_reassemble() {
    let big_text = "x".repeat(256 * 1024);
    let value = json!({"type": "assistant", "message": {"content": [
        {"type": "text", "text": big_text},
    ]}});
    let mut bytes = value.to_string().into_bytes();
    bytes.push(b'\n');

    let values = collect_chunked(&bytes, 4096).await;
    assert_eq!(values.len(), 1);
    assert_eq!(
        values[0]["message"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .len(),
        256 * 1024
    );
}

#[tokio::test]
async fn repeated_separators_and_concatenated_objects() {
    let bytes = b"\n\n{\"a\":1}\n\n\n{\"b\":2}{\"c\":3}\n\n".to_vec();
    let values = collect_chunked(&bytes, 5).await;
    assert_eq!(
        values,
        vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})]
    );
}

#[tokio::test]
async fn writer_then_reader_round_trips() {
    let inputs = vec![
        json!({"type": "user", "message": {"role": "user", "content": "hi"}}),
        json!({"type": "control_request", "request_id": "req_1_a", "request": {"subtype": "interrupt"}}),
    ];

    let mut buffer = Vec::new();
    for value in &inputs {
        claudecode_sdk::channel::write_value(&mut buffer, value)
            .await
            .unwrap();
    }

    let outputs = collect_chunked(&buffer, 3).await;
    assert_eq!(outputs, inputs);
}

#[tokio::test]
async fn decode_error_carries_the_offending_text() {
    let mut reader = FramedReader::new(&b"{\"key\": undefined}\n"[..]);
    let err = reader.next_value().await.unwrap_err();
    match err {
        SdkError::Decode { line, .. } => assert!(line.contains("undefined")),
        other => panic!("expected Decode, got {other:?}"),
    }
}
