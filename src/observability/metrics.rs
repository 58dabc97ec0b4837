use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub reconciliations_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub polls_total: IntCounterVec,
    pub chat_messages_total: IntCounterVec,
    pub connection_events_total: IntCounterVec,
    pub tracked_orders: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let reconciliations_total = IntCounterVec::new(
            Opts::new(
                "reconciliations_total",
                "Order state reconciliations by outcome",
            ),
            &["outcome"],
        )
        .expect("valid reconciliations_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Local notifications by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let polls_total = IntCounterVec::new(
            Opts::new("polls_total", "Fallback REST polls by outcome"),
            &["outcome"],
        )
        .expect("valid polls_total metric");

        let chat_messages_total = IntCounterVec::new(
            Opts::new("chat_messages_total", "Chat messages by kind"),
            &["kind"],
        )
        .expect("valid chat_messages_total metric");

        let connection_events_total = IntCounterVec::new(
            Opts::new(
                "connection_events_total",
                "Connection edges and errors surfaced to consumers",
            ),
            &["edge"],
        )
        .expect("valid connection_events_total metric");

        let tracked_orders = IntGauge::new("tracked_orders", "Orders with an open tracking session")
            .expect("valid tracked_orders metric");

        registry
            .register(Box::new(reconciliations_total.clone()))
            .expect("register reconciliations_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(polls_total.clone()))
            .expect("register polls_total");
        registry
            .register(Box::new(chat_messages_total.clone()))
            .expect("register chat_messages_total");
        registry
            .register(Box::new(connection_events_total.clone()))
            .expect("register connection_events_total");
        registry
            .register(Box::new(tracked_orders.clone()))
            .expect("register tracked_orders");

        Self {
            registry,
            reconciliations_total,
            notifications_total,
            polls_total,
            chat_messages_total,
            connection_events_total,
            tracked_orders,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
