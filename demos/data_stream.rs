//! Data stream - a data pipe handed over a message pipe.
//!
//! This example demonstrates:
//! - Sending a data pipe consumer inside a request
//! - Streaming bytes through `DataPipeWriter` with backpressure from a
//!   small pipe capacity
//! - Draining the stream on the receiving side
//!
//! ```text
//! cargo run --example data_stream
//! ```

use capwire::bindings::{StructDecoder, StructEncoder};
use capwire::system::{drain_data_pipe, DataPipeOptions, DataPipeWriter};
use capwire::{
    CapwireError, Core, DataPipeConsumerHandle, Proxy, StubBuilder, ValidationError, WireStruct,
};
use tokio::io::AsyncWriteExt;

const UPLOAD: u32 = 0;

#[derive(Debug)]
struct UploadInput {
    name: String,
    data: DataPipeConsumerHandle,
}

impl WireStruct for UploadInput {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 24)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.name);
        fields.put(16, self.data);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> Result<Self, ValidationError> {
        Ok(Self {
            name: fields.get(8)?,
            data: fields.get(16)?,
        })
    }
}

#[derive(Debug)]
struct UploadOutput {
    num_bytes: u64,
    checksum: u32,
}

impl WireStruct for UploadOutput {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 24)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.num_bytes);
        fields.put(16, self.checksum);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> Result<Self, ValidationError> {
        Ok(Self {
            num_bytes: fields.get(8)?,
            checksum: fields.get(16)?,
        })
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| acc.rotate_left(5) ^ u32::from(*b))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let core = Core::new();
    let (client, server) = core.create_message_pipe()?;

    StubBuilder::new()
        .method(UPLOAD, |input: UploadInput| async move {
            let bytes = drain_data_pipe(input.data)
                .await
                .map_err(|_| CapwireError::PeerClosed)?;
            tracing::info!(name = %input.name, num_bytes = bytes.len(), "upload received");
            Ok(UploadOutput {
                num_bytes: bytes.len() as u64,
                checksum: checksum(&bytes),
            })
        })
        .build(server)
        .spawn();

    let (producer, consumer) = core.create_data_pipe(Some(DataPipeOptions {
        element_num_bytes: 1,
        capacity_num_bytes: 4096,
    }))?;

    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let expected = checksum(&payload);

    let writer = tokio::spawn(async move {
        let mut writer = DataPipeWriter::new(producer);
        writer.write_all(&payload).await?;
        writer.shutdown().await
    });

    let proxy = Proxy::new(client);
    let output: UploadOutput = proxy
        .call(
            UPLOAD,
            UploadInput {
                name: "numbers.bin".to_string(),
                data: consumer,
            },
        )
        .await?;
    writer.await??;

    println!(
        "sent 1000000 bytes, service saw {} bytes, checksum {}",
        output.num_bytes,
        if output.checksum == expected { "matches" } else { "differs" }
    );
    Ok(())
}
