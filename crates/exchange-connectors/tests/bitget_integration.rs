//! Integration tests for the Bitget connector
//!
//! Uses wiremock for HTTP mocking: verifies endpoints, signed headers, request
//! bodies and envelope handling without touching the real exchange.

use exchange_connectors::bitget::BitgetConnector;
use exchange_connectors::signing::passphrase_signature;
use exchange_connectors::{
    Account, Direction, ExchangeConnector, ExchangeError, ExchangeId, MarginType, MarketOrder,
    TrailingStopOrder,
};
use reqwest::Method;
use rust_decimal_macros::dec;
use wiremock::{
    matchers::{body_partial_json, header, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn test_account() -> Account {
    Account::new(
        "A1",
        "bitget",
        "test_api_key".to_string(),
        "test_secret".to_string(),
        Some("test_passphrase".to_string()),
    )
}

fn connector(server: &MockServer) -> BitgetConnector {
    BitgetConnector::new(&test_account())
        .expect("valid account")
        .with_base_url(server.uri())
}

fn market_order(direction: Direction) -> MarketOrder {
    MarketOrder {
        symbol: "BTCUSDT".to_string(),
        direction,
        quantity: dec!(0.002),
        margin_type: MarginType::Cross,
        client_order_id: "tvm1700000000000000000".to_string(),
        reduce_only: false,
    }
}

#[tokio::test]
async fn test_exchange_id() {
    let server = MockServer::start().await;
    assert_eq!(connector(&server).exchange_id(), ExchangeId::Bitget);
}

#[tokio::test]
async fn test_get_available_balance_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/mix/v1/account/accounts"))
        .and(query_param("productType", "umcbl"))
        .and(header("ACCESS-KEY", "test_api_key"))
        .and(header("ACCESS-PASSPHRASE", "test_passphrase"))
        .and(header_exists("ACCESS-SIGN"))
        .and(header_exists("ACCESS-TIMESTAMP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "msg": "success",
            "data": [
                { "marginCoin": "USDT", "available": "1000", "equity": "1200" },
                { "marginCoin": "BTC", "available": "0.5" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let balance = connector(&server).get_available_balance().await.unwrap();
    assert_eq!(balance, dec!(1000));
}

#[tokio::test]
async fn test_balance_request_signature_verifies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/mix/v1/account/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": [{ "marginCoin": "USDT", "available": "1" }]
        })))
        .mount(&server)
        .await;

    connector(&server).get_available_balance().await.unwrap();

    let requests = server.received_requests().await.expect("recording enabled");
    let request = &requests[0];
    let timestamp = request.headers.get("ACCESS-TIMESTAMP").unwrap().to_str().unwrap();
    let signature = request.headers.get("ACCESS-SIGN").unwrap().to_str().unwrap();

    let expected = passphrase_signature(
        "test_secret",
        timestamp,
        &Method::GET,
        "/api/mix/v1/account/accounts?productType=umcbl",
        "",
    );
    assert_eq!(signature, expected);
}

#[tokio::test]
async fn test_missing_usdt_account_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/mix/v1/account/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": [{ "marginCoin": "BTC", "available": "0.5" }]
        })))
        .mount(&server)
        .await;

    let result = connector(&server).get_available_balance().await;
    assert!(matches!(result, Err(ExchangeError::Decode(_))));
}

#[tokio::test]
async fn test_get_last_price_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/mix/v1/market/ticker"))
        .and(query_param("symbol", "BTCUSDT_UMCBL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": { "symbol": "BTCUSDT_UMCBL", "last": "50000.5", "bestAsk": "50001" }
        })))
        .mount(&server)
        .await;

    let price = connector(&server).get_last_price("BTCUSDT").await.unwrap();
    assert_eq!(price, dec!(50000.5));
}

#[tokio::test]
async fn test_set_leverage_sends_contract_symbol() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/account/setLeverage"))
        .and(body_partial_json(serde_json::json!({
            "symbol": "BTCUSDT_UMCBL",
            "marginCoin": "USDT",
            "leverage": "5"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": { "symbol": "BTCUSDT_UMCBL", "crossMarginLeverage": 5 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    connector(&server).set_leverage("BTCUSDT", 5).await.unwrap();
}

#[tokio::test]
async fn test_set_margin_mode_error_code_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/account/setMarginMode"))
        .and(body_partial_json(serde_json::json!({ "marginMode": "fixed" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": "45117",
            "msg": "Currently holding positions or orders, the margin mode cannot be adjusted",
            "data": null
        })))
        .mount(&server)
        .await;

    let err = connector(&server)
        .set_margin_mode("BTCUSDT", MarginType::Isolated, 5)
        .await
        .unwrap_err();
    match err {
        ExchangeError::Api { code, .. } => assert_eq!(code, "45117"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_isolated_margin_applies_leverage_to_both_hold_sides() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/account/setMarginMode"))
        .and(body_partial_json(serde_json::json!({
            "symbol": "BTCUSDT_UMCBL",
            "marginMode": "fixed"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000", "data": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    for hold_side in ["long", "short"] {
        Mock::given(method("POST"))
            .and(path("/api/mix/v1/account/setLeverage"))
            .and(body_partial_json(serde_json::json!({
                "symbol": "BTCUSDT_UMCBL",
                "marginCoin": "USDT",
                "leverage": "5",
                "holdSide": hold_side
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "00000", "data": {}
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    connector(&server)
        .set_margin_mode("BTCUSDT", MarginType::Isolated, 5)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(
        paths,
        [
            "/api/mix/v1/account/setMarginMode",
            "/api/mix/v1/account/setLeverage",
            "/api/mix/v1/account/setLeverage",
        ]
    );
}

#[tokio::test]
async fn test_crossed_margin_sends_no_hold_side_leverage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/account/setMarginMode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000", "data": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    connector(&server)
        .set_margin_mode("BTCUSDT", MarginType::Cross, 5)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_place_market_order_sends_direction_as_side() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/order/placeOrder"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "symbol": "BTCUSDT_UMCBL",
            "marginCoin": "USDT",
            "size": "0.002",
            "side": "close_short",
            "orderType": "market",
            "clientOid": "tvm1700000000000000000"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": { "orderId": "1001", "clientOid": "tvm1700000000000000000" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = connector(&server)
        .place_market_order(&market_order(Direction::CloseShort))
        .await
        .unwrap();
    assert_eq!(response["data"]["orderId"], "1001");
}

#[tokio::test]
async fn test_order_signature_covers_exact_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/order/placeOrder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000", "data": {}
        })))
        .mount(&server)
        .await;

    connector(&server)
        .place_market_order(&market_order(Direction::OpenLong))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let timestamp = request.headers.get("ACCESS-TIMESTAMP").unwrap().to_str().unwrap();
    let signature = request.headers.get("ACCESS-SIGN").unwrap().to_str().unwrap();
    let body = std::str::from_utf8(&request.body).unwrap();

    let expected = passphrase_signature(
        "test_secret",
        timestamp,
        &Method::POST,
        "/api/mix/v1/order/placeOrder",
        body,
    );
    assert_eq!(signature, expected);
}

#[tokio::test]
async fn test_order_rejection_is_returned_verbatim() {
    let server = MockServer::start().await;

    let rejection = serde_json::json!({
        "code": "40762",
        "msg": "The order amount exceeds the balance",
        "data": null
    });
    Mock::given(method("POST"))
        .and(path("/api/mix/v1/order/placeOrder"))
        .respond_with(ResponseTemplate::new(400).set_body_json(rejection.clone()))
        .mount(&server)
        .await;

    let response = connector(&server)
        .place_market_order(&market_order(Direction::OpenLong))
        .await
        .expect("business rejections are data");
    assert_eq!(response, rejection);
}

#[tokio::test]
async fn test_each_signed_call_uses_a_new_timestamp() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000", "data": {}
        })))
        .mount(&server)
        .await;

    let connector = connector(&server);
    connector.set_leverage("BTCUSDT", 3).await.unwrap();
    connector
        .set_margin_mode("BTCUSDT", MarginType::Cross, 3)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let stamps: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("ACCESS-TIMESTAMP").unwrap().clone())
        .collect();
    assert_eq!(stamps.len(), 2);
    assert_ne!(stamps[0], stamps[1]);
}

#[tokio::test]
async fn test_trailing_stop_closes_the_opened_side() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/mix/v1/plan/placeTrailStop"))
        .and(body_partial_json(serde_json::json!({
            "symbol": "BTCUSDT_UMCBL",
            "triggerPrice": "51000",
            "size": "0.002",
            "side": "close_long",
            "rangeRate": "1.5"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000", "data": { "orderId": "77" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = TrailingStopOrder {
        symbol: "BTCUSDT".to_string(),
        direction: Direction::OpenLong,
        quantity: dec!(0.002),
        callback: dec!(1.5),
        activation_price: dec!(51000),
    };
    let response = connector(&server).place_trailing_stop(&order).await.unwrap();
    assert_eq!(response["data"]["orderId"], "77");
}

#[tokio::test]
async fn test_unreachable_host_is_a_network_error() {
    let connector = BitgetConnector::new(&test_account())
        .unwrap()
        .with_base_url("http://127.0.0.1:9");

    let result = connector.get_last_price("BTCUSDT").await;
    assert!(matches!(result, Err(ExchangeError::Network(_))));
}
