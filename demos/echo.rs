//! Echo service - simple request/response example.
//!
//! This example demonstrates:
//! - Describing request and response structs with `WireStruct`
//! - Registering handlers with the `StubBuilder`
//! - Calling the stub through a `Proxy`, including an application error
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo
//! ```

use capwire::bindings::{StructDecoder, StructEncoder};
use capwire::{CapwireError, Core, Proxy, StubBuilder, ValidationError, WireStruct};

const ECHO: u32 = 0;
const SHOUT: u32 = 1;

#[derive(Debug)]
struct EchoInput {
    message: String,
}

impl WireStruct for EchoInput {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.message);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> Result<Self, ValidationError> {
        Ok(Self {
            message: fields.get(8)?,
        })
    }
}

#[derive(Debug)]
struct EchoOutput {
    echo: String,
}

impl WireStruct for EchoOutput {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.echo);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> Result<Self, ValidationError> {
        Ok(Self {
            echo: fields.get(8)?,
        })
    }
}

fn input(message: &str) -> EchoInput {
    EchoInput {
        message: message.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let core = Core::new();
    let (client, server) = core.create_message_pipe()?;

    let service = StubBuilder::new()
        .method(ECHO, |data: EchoInput| async move {
            Ok(EchoOutput { echo: data.message })
        })
        .method(SHOUT, |data: EchoInput| async move {
            if data.message.is_empty() {
                return Err(CapwireError::Application {
                    code: 1,
                    message: "nothing to shout".to_string(),
                });
            }
            Ok(EchoOutput {
                echo: data.message.to_uppercase(),
            })
        })
        .build(server)
        .spawn();

    let proxy = Proxy::new(client);

    let reply: EchoOutput = proxy.call(ECHO, input("hello")).await?;
    println!("echo: {}", reply.echo);

    let reply: EchoOutput = proxy.call(SHOUT, input("hello")).await?;
    println!("shout: {}", reply.echo);

    match proxy.call::<_, EchoOutput>(SHOUT, input("")).await {
        Err(err) => println!("shout failed as expected: {err}"),
        Ok(reply) => println!("unexpected reply: {}", reply.echo),
    }

    // Closing the client ends the service loop.
    drop(proxy);
    service.await??;

    Ok(())
}
