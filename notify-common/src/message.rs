/// A message as received from the source topic, detached from the consumer
/// so it can cross task boundaries.
///
/// Producers stamp a `messageId` header on every record; `message_id` is
/// `None` when a producer did not. Use [`ReceivedMessage::ledger_id`] for
/// the identity the pipeline dedupes on.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub key: Option<String>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    /// The identity processed-record entries are keyed on.
    ///
    /// Falls back to the record coordinates when no `messageId` header was
    /// present, so redelivery of the same record still dedupes.
    pub fn ledger_id(&self) -> String {
        match &self.message_id {
            Some(id) => id.clone(),
            None => format!("{}:{}:{}", self.topic, self.partition, self.offset),
        }
    }
}
