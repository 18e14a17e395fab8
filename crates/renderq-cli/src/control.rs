//! Stdin control protocol: one JSON object per line, one JSON reply per line.
//!
//! ```text
//! {"command":"submit","source":"https://cdn/x.vmax.zip","display_name":"x.vmax.zip","destination":1,"requester":2,"requester_name":"harvey","metadata":"orbit=30"}
//! {"command":"queue"}
//! {"command":"history","limit":5}
//! {"command":"cancel","requester":2}
//! {"command":"shutdown"}
//! ```

use renderq_core::Runtime;
use renderq_core::domain::{ChannelId, NewJob, UserId};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Submit {
        source: String,
        display_name: String,
        destination: u64,
        requester: u64,
        requester_name: String,
        #[serde(default)]
        metadata: String,
    },
    Queue,
    History {
        #[serde(default)]
        limit: Option<usize>,
    },
    Cancel {
        requester: u64,
    },
    Shutdown,
}

/// Whether the read loop should keep going after a command.
pub enum Flow {
    Continue,
    Stop,
}

pub fn parse(line: &str) -> Result<ControlCommand, serde_json::Error> {
    serde_json::from_str(line)
}

pub async fn handle(runtime: &Runtime, command: ControlCommand) -> (Value, Flow) {
    let control = runtime.control();
    let reply = match command {
        ControlCommand::Submit {
            source,
            display_name,
            destination,
            requester,
            requester_name,
            metadata,
        } => {
            let job = NewJob {
                source,
                display_name,
                destination: ChannelId::from_u64(destination),
                requester: UserId::from_u64(requester),
                requester_name,
                metadata,
            };
            runtime
                .submit(job)
                .await
                .map(|id| json!({ "ok": true, "job_id": id.get() }))
        }
        ControlCommand::Queue => control.list_queue().await.map(|entries| {
            json!({ "ok": true, "text": control.render_queue(&entries), "entries": entries })
        }),
        ControlCommand::History { limit } => control.list_history(limit).await.map(|entries| {
            json!({ "ok": true, "text": control.render_history(&entries), "entries": entries })
        }),
        ControlCommand::Cancel { requester } => control
            .request_cancel(UserId::from_u64(requester))
            .await
            .map(|reply| json!({ "ok": true, "text": reply.to_string(), "reply": reply })),
        ControlCommand::Shutdown => return (json!({ "ok": true, "text": "shutting down" }), Flow::Stop),
    };

    match reply {
        Ok(value) => (value, Flow::Continue),
        Err(e) => (json!({ "ok": false, "error": e.to_string() }), Flow::Continue),
    }
}
