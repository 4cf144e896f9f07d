//! Message and account hooks that feed the identity store.

use ntbridge_core::commands::receive;
use ntbridge_core::frame::EventFrame;
use ntbridge_core::identity::SelfAccount;
use ntbridge_core::message::MessageRecord;
use ntbridge_hook::{Interceptor, NameFilter, ObserverHandle};
use ntbridge_store::IdentityStore;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Host status code for "offline".
const STATUS_OFFLINE: i64 = 20;

/// Message events come as a list or as a single record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessagePayload {
    List {
        #[serde(rename = "msgList")]
        msg_list: Vec<MessageRecord>,
    },
    Single {
        #[serde(rename = "msgRecord")]
        msg_record: MessageRecord,
    },
}

impl MessagePayload {
    fn into_records(self) -> Vec<MessageRecord> {
        match self {
            MessagePayload::List { msg_list } => msg_list,
            MessagePayload::Single { msg_record } => vec![msg_record],
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    info: StatusInfo,
}

#[derive(Debug, Deserialize)]
struct StatusInfo {
    status: i64,
}

pub fn messages(event: &EventFrame) -> Result<Vec<MessageRecord>, serde_json::Error> {
    Ok(event.decode::<MessagePayload>()?.into_records())
}

/// Register the message and status hooks. Returns their handles.
pub fn install(
    interceptor: &Interceptor,
    store: Arc<IdentityStore>,
    account: Arc<SelfAccount>,
) -> Vec<ObserverHandle> {
    let mut handles = Vec::new();

    let allocating = store.clone();
    handles.push(interceptor.on_event(
        NameFilter::new([
            receive::NEW_MSG,
            receive::NEW_ACTIVE_MSG,
            receive::SELF_SEND_MSG,
        ]),
        move |event| {
            let store = allocating.clone();
            async move {
                for record in messages(&event)? {
                    let msg_id = record.msg_id.clone();
                    let short_id = store.allocate_or_find(record).await?;
                    debug!(command = %event.command, msg_id = %msg_id, short_id, "Message captured");
                }
                Ok(())
            }
        },
    ));

    let updating = store;
    handles.push(interceptor.on_event(
        NameFilter::new([receive::UPDATE_MSG, receive::UPDATE_ACTIVE_MSG]),
        move |event| {
            let store = updating.clone();
            async move {
                for record in messages(&event)? {
                    store.update(record).await?;
                }
                Ok(())
            }
        },
    ));

    handles.push(interceptor.on_event(
        NameFilter::new([receive::SELF_STATUS]),
        move |event| {
            let account = account.clone();
            async move {
                let payload: StatusPayload = event.decode()?;
                let online = payload.info.status != STATUS_OFFLINE;
                if account.is_online() != online {
                    info!(online, status = payload.info.status, "Account status changed");
                }
                account.set_online(online);
                Ok(())
            }
        },
    ));

    handles
}
