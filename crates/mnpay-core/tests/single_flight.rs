//! Credential cache coalescing against a real token endpoint


use mnpay_core::{ClientAuth, CredentialCache, ErrorKind, ProviderClient, RequestExecutor};
use test_support::{fast_config, fast_policy, transport, OAuthTokens};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_make_one_token_request() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/oauth/token")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body("grant_type=client_credentials")
        .with_status(200)
        .with_body(r#"{"access_token": "shared-token", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;

    let cache = CredentialCache::new(
        OAuthTokens {
            url: format!("{}/oauth/token", server.url()),
        },
        RequestExecutor::new("monpay", transport()),
    );

    let callers: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_valid_token().await })
        })
        .collect();

    for caller in callers {
        let credential = caller.await.unwrap().unwrap();
        assert_eq!(credential.access_token(), "shared-token");
    }
    token.assert_async().await;
}

#[tokio::test]
async fn test_failed_fetch_is_retried_on_next_call() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("POST", "/oauth/token")
        .with_status(401)
        .with_body(r#"{"error": "invalid_client"}"#)
        .expect(1)
        .create_async()
        .await;

    let cache = CredentialCache::builder(
        OAuthTokens {
            url: format!("{}/oauth/token", server.url()),
        },
        RequestExecutor::new("monpay", transport()),
    )
    .retry_policy(fast_policy(3))
    .build();

    let err = cache.get_valid_token().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.message(), "invalid_client");
    rejected.assert_async().await;
    rejected.remove_async().await;

    let accepted = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(r#"{"access_token": "second-try", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    assert_eq!(cache.get_valid_token().await.unwrap().access_token(), "second-try");
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_client_reauthenticates_after_401() {
    let mut server = mockito::Server::new_async().await;
    let first_token = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(r#"{"access_token": "first", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    let rejected = server
        .mock("GET", "/invoice/1")
        .match_header("authorization", "Bearer first")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let config = fast_config(&server.url());
    let client = ProviderClient::with_transport("monpay", config, transport()).unwrap();
    let cache = CredentialCache::new(
        OAuthTokens {
            url: format!("{}/oauth/token", server.url()),
        },
        client.executor().clone(),
    );
    let client = client.with_auth(ClientAuth::Cached(cache));

    let err = client.call(&support_ops::GetInvoice).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    first_token.assert_async().await;
    rejected.assert_async().await;
    first_token.remove_async().await;

    let second_token = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(r#"{"access_token": "second", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/invoice/1")
        .match_header("authorization", "Bearer second")
        .with_status(200)
        .with_body(r#"{"id": "1"}"#)
        .expect(1)
        .create_async()
        .await;

    let body = client.call(&support_ops::GetInvoice).await.unwrap();
    assert_eq!(body["id"], "1");
    second_token.assert_async().await;
    accepted.assert_async().await;
}

mod support_ops {
    use mnpay_core::{Endpoint, ErrorClassifier, Parsed, ProviderOperation, RawResponse};
    use serde_json::Value;
    use std::borrow::Cow;

    pub struct GetInvoice;

    impl ProviderOperation for GetInvoice {
        type Output = Value;

        fn endpoint(&self) -> Endpoint {
            Endpoint::get("/invoice")
        }

        fn path(&self) -> Cow<'_, str> {
            Cow::Borrowed("/invoice/1")
        }

        fn parse(&self, response: RawResponse, classifier: &ErrorClassifier) -> Parsed<Value> {
            Parsed::json(&response, classifier)
        }
    }
}
