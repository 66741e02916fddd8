use iotwatch_observability::Counter;

#[derive(Clone)]
pub struct PipelineMetrics {
    pub events_received: Counter<u64>,
    pub decode_failures: Counter<u64>,
    pub inference_fallbacks: Counter<u64>,
    pub records_written: Counter<u64>,
    pub write_failures: Counter<u64>,
    pub checkpoints_committed: Counter<u64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        let meter = iotwatch_observability::meter("pipeline");
        Self {
            events_received: meter
                .u64_counter("pipeline.events.received")
                .with_unit("{event}")
                .with_description("events delivered by the stream transport")
                .build(),
            decode_failures: meter
                .u64_counter("pipeline.events.decode_failures")
                .with_unit("{event}")
                .with_description("events skipped because their payload could not be decoded")
                .build(),
            inference_fallbacks: meter
                .u64_counter("pipeline.inference.fallbacks")
                .with_unit("{event}")
                .with_description("readings stored with the fallback classification")
                .build(),
            records_written: meter
                .u64_counter("pipeline.store.written")
                .with_unit("{record}")
                .with_description("records upserted into the document store")
                .build(),
            write_failures: meter
                .u64_counter("pipeline.store.failures")
                .with_unit("{record}")
                .with_description("records whose upsert failed")
                .build(),
            checkpoints_committed: meter
                .u64_counter("pipeline.checkpoints")
                .with_unit("{checkpoint}")
                .with_description("partition checkpoints committed")
                .build(),
        }
    }
}

#[derive(Clone)]
pub struct TelemetryMetrics {
    pub enqueued: Counter<u64>,
    pub dropped: Counter<u64>,
    pub push_failures: Counter<u64>,
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        let meter = iotwatch_observability::meter("telemetry");
        Self {
            enqueued: meter
                .u64_counter("telemetry.enqueued")
                .with_unit("{payload}")
                .with_description("metric payloads queued for delivery")
                .build(),
            dropped: meter
                .u64_counter("telemetry.dropped")
                .with_unit("{payload}")
                .with_description("metric payloads dropped because the queue was full or closed")
                .build(),
            push_failures: meter
                .u64_counter("telemetry.push_failures")
                .with_unit("{payload}")
                .with_description("metric payloads the sink failed to deliver")
                .build(),
        }
    }
}
