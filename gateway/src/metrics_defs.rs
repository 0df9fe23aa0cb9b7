use shared::metrics_defs::MetricDef;

pub const BROADCAST_SUCCESS: MetricDef =
    MetricDef::counter("broadcast.success", "Successful broadcasts");

pub const BROADCAST_FAILURE: MetricDef =
    MetricDef::counter("broadcast.failure", "Failed broadcasts");

pub const BROADCAST_EARLY_TERMINATION: MetricDef = MetricDef::counter(
    "broadcast.early.termination",
    "Broadcasts that terminated early on first success",
);

pub const BROADCAST_DURATION: MetricDef = MetricDef::histogram(
    "broadcast.duration",
    "Broadcast duration in seconds. Tagged with outcome.",
);

pub const PARTNER_HTTP_SUCCESS: MetricDef = MetricDef::counter(
    "partner.http.success",
    "Partner requests whose status matched the success pattern",
);

pub const PARTNER_HTTP_ERRORS: MetricDef = MetricDef::counter(
    "partner.http.errors",
    "Partner requests that failed or were business rejections",
);

pub const PARTNER_HTTP_TIMEOUTS: MetricDef =
    MetricDef::counter("partner.http.timeouts", "Partner requests that timed out");

pub const PARTNER_HTTP_DURATION: MetricDef = MetricDef::histogram(
    "partner.http.duration",
    "Partner request duration in seconds. Tagged with partner_id.",
);

pub const CIRCUIT_BREAKER_OPEN: MetricDef = MetricDef::counter(
    "partner.circuitbreaker.open",
    "Calls rejected because the partner breaker was open",
);

pub const CIRCUIT_BREAKER_SUCCESS: MetricDef = MetricDef::counter(
    "partner.circuitbreaker.success",
    "Call outcomes recorded as success on a partner breaker",
);

pub const CIRCUIT_BREAKER_FAILURE: MetricDef = MetricDef::counter(
    "partner.circuitbreaker.failure",
    "Call outcomes recorded as failure on a partner breaker",
);

pub const ALL_METRICS: &[MetricDef] = &[
    BROADCAST_SUCCESS,
    BROADCAST_FAILURE,
    BROADCAST_EARLY_TERMINATION,
    BROADCAST_DURATION,
    PARTNER_HTTP_SUCCESS,
    PARTNER_HTTP_ERRORS,
    PARTNER_HTTP_TIMEOUTS,
    PARTNER_HTTP_DURATION,
    CIRCUIT_BREAKER_OPEN,
    CIRCUIT_BREAKER_SUCCESS,
    CIRCUIT_BREAKER_FAILURE,
];
