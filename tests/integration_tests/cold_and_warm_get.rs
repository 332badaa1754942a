// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use cache_proxy_rs::cfg::config::RuntimeConfig;

use crate::integration_tests::common::{
    RESPONSE_OK, get_request, roundtrip, spawn_origin, spawn_proxy, teardown,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_get_relays_the_exact_response_and_populates_the_cache() {
    let origin = spawn_origin(RESPONSE_OK, Duration::ZERO).await;
    let (proxy, addr) = spawn_proxy(RuntimeConfig {
        workers: 4,
        ..RuntimeConfig::default()
    })
    .await;

    let request = get_request(origin.addr, "/file.txt");
    let response = roundtrip(addr, &request).await;

    assert_eq!(response.len(), 51);
    assert_eq!(response.as_ref(), RESPONSE_OK);
    assert_eq!(proxy.cache().size(), 1);
    assert_eq!(origin.accepted(), 1);

    teardown(proxy).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn warm_get_is_served_without_a_new_origin_connection() {
    let origin = spawn_origin(RESPONSE_OK, Duration::ZERO).await;
    let (proxy, addr) = spawn_proxy(RuntimeConfig {
        workers: 4,
        ..RuntimeConfig::default()
    })
    .await;

    let request = get_request(origin.addr, "/file.txt");
    let cold = roundtrip(addr, &request).await;
    let warm = roundtrip(addr, &request).await;

    assert_eq!(warm, cold);
    assert_eq!(origin.accepted(), 1);
    assert_eq!(proxy.cache().size(), 1);

    teardown(proxy).await;
}
