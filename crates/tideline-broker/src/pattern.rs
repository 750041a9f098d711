use serde::{Deserialize, Serialize};

/// The closed set of outbound message patterns the core emits, per spec
/// §4.6. Routing from pattern to queue is static and total over this
/// enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    #[serde(rename = "job.start")]
    JobStart,
    #[serde(rename = "job.cancel")]
    JobCancel,
    #[serde(rename = "job.raw_data")]
    JobRawData,
    #[serde(rename = "job.initial_batch_complete")]
    JobInitialBatchComplete,
    #[serde(rename = "job.ingestion_complete")]
    JobIngestionComplete,
    #[serde(rename = "job.complete")]
    JobComplete,
    #[serde(rename = "job.failed")]
    JobFailed,
    #[serde(rename = "job.data_update")]
    JobDataUpdate,
    #[serde(rename = "health.check")]
    HealthCheck,
}

/// The named destination queue for each [`Pattern`], per the §6 routing
/// table. Implemented as a NATS subject by [`crate::BrokerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Ingestion,
    Analysis,
    Gateway,
}

impl Queue {
    pub fn as_subject(self) -> &'static str {
        match self {
            Queue::Ingestion => "tideline.ingestion",
            Queue::Analysis => "tideline.analysis",
            Queue::Gateway => "tideline.gateway",
        }
    }
}

impl Pattern {
    /// The wire name used as the `pattern` discriminator field and as the
    /// subject suffix.
    pub fn name(self) -> &'static str {
        match self {
            Pattern::JobStart => "job.start",
            Pattern::JobCancel => "job.cancel",
            Pattern::JobRawData => "job.raw_data",
            Pattern::JobInitialBatchComplete => "job.initial_batch_complete",
            Pattern::JobIngestionComplete => "job.ingestion_complete",
            Pattern::JobComplete => "job.complete",
            Pattern::JobFailed => "job.failed",
            Pattern::JobDataUpdate => "job.data_update",
            Pattern::HealthCheck => "health.check",
        }
    }

    /// Total, static routing from pattern to destination queue (spec §6).
    pub fn queue(self) -> Queue {
        match self {
            Pattern::JobStart => Queue::Ingestion,
            Pattern::JobCancel => Queue::Ingestion,
            Pattern::JobRawData => Queue::Analysis,
            Pattern::JobInitialBatchComplete => Queue::Gateway,
            Pattern::JobIngestionComplete => Queue::Analysis,
            Pattern::JobComplete => Queue::Gateway,
            Pattern::JobFailed => Queue::Gateway,
            Pattern::JobDataUpdate => Queue::Gateway,
            Pattern::HealthCheck => Queue::Gateway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_table_matches_spec_section_6() {
        assert_eq!(Pattern::JobStart.queue(), Queue::Ingestion);
        assert_eq!(Pattern::JobCancel.queue(), Queue::Ingestion);
        assert_eq!(Pattern::JobRawData.queue(), Queue::Analysis);
        assert_eq!(Pattern::JobInitialBatchComplete.queue(), Queue::Gateway);
        assert_eq!(Pattern::JobIngestionComplete.queue(), Queue::Analysis);
        assert_eq!(Pattern::JobComplete.queue(), Queue::Gateway);
        assert_eq!(Pattern::JobFailed.queue(), Queue::Gateway);
        assert_eq!(Pattern::JobDataUpdate.queue(), Queue::Gateway);
        assert_eq!(Pattern::HealthCheck.queue(), Queue::Gateway);
    }

    #[test]
    fn pattern_serializes_to_its_dotted_name() {
        let json = serde_json::to_string(&Pattern::JobRawData).unwrap();
        assert_eq!(json, "\"job.raw_data\"");
    }
}
