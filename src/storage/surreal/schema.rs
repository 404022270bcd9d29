// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Table definitions for both embedded databases.
//!
//! Time-series tables lead with `timestamp` and always carry `tenant_id`;
//! every analytical query filters on both.

/// Schema for the time-series database.
pub const TIMESERIES_SCHEMA: &str = r#"
-- Table: system_metrics
DEFINE TABLE OVERWRITE system_metrics SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON system_metrics TYPE datetime;
DEFINE FIELD OVERWRITE metric_name ON system_metrics TYPE string;
DEFINE FIELD OVERWRITE value ON system_metrics TYPE number;
DEFINE FIELD OVERWRITE tenant_id ON system_metrics TYPE string;
DEFINE INDEX OVERWRITE system_metrics_ts_idx ON system_metrics FIELDS tenant_id, metric_name, timestamp;

-- Table: log_index
DEFINE TABLE OVERWRITE log_index SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON log_index TYPE datetime;
DEFINE FIELD OVERWRITE path ON log_index TYPE string;
DEFINE FIELD OVERWRITE severity ON log_index TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON log_index TYPE string;
DEFINE INDEX OVERWRITE log_index_ts_idx ON log_index FIELDS tenant_id, timestamp;

-- Table: sdk_events
DEFINE TABLE OVERWRITE sdk_events SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON sdk_events TYPE datetime;
DEFINE FIELD OVERWRITE service ON sdk_events TYPE string;
DEFINE FIELD OVERWRITE event_type ON sdk_events TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON sdk_events TYPE string;
DEFINE INDEX OVERWRITE sdk_events_ts_idx ON sdk_events FIELDS tenant_id, service, timestamp;

-- Table: sdk_metrics
DEFINE TABLE OVERWRITE sdk_metrics SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON sdk_metrics TYPE datetime;
DEFINE FIELD OVERWRITE service ON sdk_metrics TYPE string;
DEFINE FIELD OVERWRITE metric_name ON sdk_metrics TYPE string;
DEFINE FIELD OVERWRITE value ON sdk_metrics TYPE number;
DEFINE FIELD OVERWRITE tenant_id ON sdk_metrics TYPE string;
DEFINE INDEX OVERWRITE sdk_metrics_ts_idx ON sdk_metrics FIELDS tenant_id, service, metric_name, timestamp;

-- Table: spans
DEFINE TABLE OVERWRITE spans SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON spans TYPE datetime;
DEFINE FIELD OVERWRITE trace_id ON spans TYPE string;
DEFINE FIELD OVERWRITE span_id ON spans TYPE string;
DEFINE FIELD OVERWRITE service ON spans TYPE string;
DEFINE FIELD OVERWRITE status ON spans TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON spans TYPE string;
DEFINE INDEX OVERWRITE spans_trace_idx ON spans FIELDS tenant_id, trace_id;
DEFINE INDEX OVERWRITE spans_ts_idx ON spans FIELDS tenant_id, service, timestamp;

-- Table: dependency_calls
DEFINE TABLE OVERWRITE dependency_calls SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON dependency_calls TYPE datetime;
DEFINE FIELD OVERWRITE service ON dependency_calls TYPE string;
DEFINE FIELD OVERWRITE dep_type ON dependency_calls TYPE string;
DEFINE FIELD OVERWRITE target ON dependency_calls TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON dependency_calls TYPE string;
DEFINE INDEX OVERWRITE dependency_calls_ts_idx ON dependency_calls FIELDS tenant_id, service, timestamp;

-- Table: deploy_events
DEFINE TABLE OVERWRITE deploy_events SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON deploy_events TYPE datetime;
DEFINE FIELD OVERWRITE service ON deploy_events TYPE string;
DEFINE FIELD OVERWRITE version ON deploy_events TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON deploy_events TYPE string;
DEFINE INDEX OVERWRITE deploy_events_ts_idx ON deploy_events FIELDS tenant_id, service, timestamp;

-- Table: metric_baselines (full replace on refresh)
DEFINE TABLE OVERWRITE metric_baselines SCHEMALESS;
DEFINE FIELD OVERWRITE metric_name ON metric_baselines TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON metric_baselines TYPE string;
DEFINE INDEX OVERWRITE metric_baselines_name_idx ON metric_baselines FIELDS tenant_id, metric_name UNIQUE;
"#;

/// Schema for the operational database.
pub const OPERATIONAL_SCHEMA: &str = r#"
-- Table: conversations
DEFINE TABLE OVERWRITE conversations SCHEMALESS;
DEFINE FIELD OVERWRITE conversation_id ON conversations TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON conversations TYPE string;
DEFINE INDEX OVERWRITE conversations_id_idx ON conversations FIELDS tenant_id, conversation_id UNIQUE;

-- Table: messages
DEFINE TABLE OVERWRITE messages SCHEMALESS;
DEFINE FIELD OVERWRITE conversation_id ON messages TYPE string;
DEFINE FIELD OVERWRITE role ON messages TYPE string ASSERT $value IN ['user', 'assistant', 'system', 'tool'];
DEFINE FIELD OVERWRITE tenant_id ON messages TYPE string;
DEFINE INDEX OVERWRITE messages_conv_idx ON messages FIELDS tenant_id, conversation_id;

-- Table: audit_log (append-only; no update path exists in code)
DEFINE TABLE OVERWRITE audit_log SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON audit_log TYPE datetime;
DEFINE FIELD OVERWRITE success ON audit_log TYPE bool;
DEFINE FIELD OVERWRITE tenant_id ON audit_log TYPE string;
DEFINE INDEX OVERWRITE audit_log_ts_idx ON audit_log FIELDS tenant_id, timestamp;

-- Table: alert_history
DEFINE TABLE OVERWRITE alert_history SCHEMALESS;
DEFINE FIELD OVERWRITE alert_id ON alert_history TYPE string;
DEFINE FIELD OVERWRITE timestamp ON alert_history TYPE datetime;
DEFINE FIELD OVERWRITE tenant_id ON alert_history TYPE string;
DEFINE INDEX OVERWRITE alert_history_id_idx ON alert_history FIELDS tenant_id, alert_id;

-- Table: alert_acknowledgments
DEFINE TABLE OVERWRITE alert_acknowledgments SCHEMALESS;
DEFINE FIELD OVERWRITE dedup_key ON alert_acknowledgments TYPE string;
DEFINE FIELD OVERWRITE active ON alert_acknowledgments TYPE bool;
DEFINE FIELD OVERWRITE tenant_id ON alert_acknowledgments TYPE string;
DEFINE INDEX OVERWRITE alert_acks_key_idx ON alert_acknowledgments FIELDS tenant_id, dedup_key UNIQUE;

-- Table: alert_rule_mutes
DEFINE TABLE OVERWRITE alert_rule_mutes SCHEMALESS;
DEFINE FIELD OVERWRITE rule_id ON alert_rule_mutes TYPE string;
DEFINE FIELD OVERWRITE active ON alert_rule_mutes TYPE bool;
DEFINE FIELD OVERWRITE tenant_id ON alert_rule_mutes TYPE string;
DEFINE INDEX OVERWRITE alert_mutes_rule_idx ON alert_rule_mutes FIELDS tenant_id, rule_id UNIQUE;

-- Table: token_usage
DEFINE TABLE OVERWRITE token_usage SCHEMALESS;
DEFINE FIELD OVERWRITE timestamp ON token_usage TYPE datetime;
DEFINE FIELD OVERWRITE provider ON token_usage TYPE string;
DEFINE FIELD OVERWRITE model ON token_usage TYPE string;
DEFINE FIELD OVERWRITE tenant_id ON token_usage TYPE string;
DEFINE INDEX OVERWRITE token_usage_ts_idx ON token_usage FIELDS tenant_id, timestamp;

-- Table: investigations
DEFINE TABLE OVERWRITE investigations SCHEMALESS;
DEFINE FIELD OVERWRITE investigation_id ON investigations TYPE string;
DEFINE FIELD OVERWRITE timestamp ON investigations TYPE datetime;
DEFINE FIELD OVERWRITE tenant_id ON investigations TYPE string;
DEFINE INDEX OVERWRITE investigations_ts_idx ON investigations FIELDS tenant_id, timestamp;
"#;
