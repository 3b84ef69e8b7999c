/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod firehose;
pub mod follows;
pub mod ingest;
pub mod ranking;
pub mod reconcile;
pub mod retention;
pub mod server;
pub mod store;
