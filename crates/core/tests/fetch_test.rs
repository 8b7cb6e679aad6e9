mod common;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{FakeRemote, Reply};
use pilot::protocol::FetchHopParams;
use pilot::{Error, FetchOptions, HttpCredentials, OperationState, ProxySettings, RequestContextOptions};
use serde_json::json;

const EMPTY: &str = "http://localhost/empty.html";

fn header<'a>(hop: &'a FetchHopParams, name: &str) -> Option<&'a str> {
	hop.headers
		.iter()
		.find(|h| h.name.eq_ignore_ascii_case(name))
		.map(|h| h.value.as_str())
}

fn posted(hop: &FetchHopParams) -> Vec<u8> {
	STANDARD.decode(hop.post_data.as_deref().unwrap_or_default()).unwrap()
}

#[tokio::test]
async fn test_get_sends_default_headers() {
	common::init_test_logging();
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(EMPTY, Reply::new(200).header("Content-Type", "text/html").body("<html></html>"));

	let request = pilot.new_request_context(None).await.unwrap();
	let response = request.get(EMPTY, None).await.unwrap();

	assert_eq!(response.status(), 200);
	assert!(response.ok());
	assert_eq!(response.url(), EMPTY);
	assert_eq!(response.text().await.unwrap(), "<html></html>");
	assert_eq!(response.headers().get("content-type").map(String::as_str), Some("text/html"));

	let hops = remote.hops();
	assert_eq!(hops.len(), 1);
	assert_eq!(hops[0].method, "GET");
	assert_eq!(header(&hops[0], "user-agent"), Some(pilot::user_agent::default_user_agent()));
	assert_eq!(header(&hops[0], "accept"), Some("*/*"));
	assert!(hops[0].post_data.is_none());

	let (_, params) = &remote.calls("newRequest")[0];
	assert_eq!(params["userAgent"], pilot::user_agent::default_user_agent());
}

#[tokio::test]
async fn test_every_method_reaches_the_remote() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(EMPTY, Reply::new(200).body("body"));
	let request = pilot.new_request_context(None).await.unwrap();

	request.get(EMPTY, None).await.unwrap();
	request.post(EMPTY, None).await.unwrap();
	request.put(EMPTY, None).await.unwrap();
	request.patch(EMPTY, None).await.unwrap();
	request.delete(EMPTY, None).await.unwrap();
	let head = request.head(EMPTY, None).await.unwrap();
	request
		.fetch(EMPTY, Some(FetchOptions::new().method("trace")))
		.await
		.unwrap();

	let methods: Vec<String> = remote.hops().into_iter().map(|h| h.method).collect();
	assert_eq!(methods, ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "TRACE"]);
	assert!(head.body().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_user_agent_and_extra_headers() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(EMPTY, Reply::new(200));
	let request = pilot
		.new_request_context(Some(
			RequestContextOptions::builder()
				.user_agent("My Agent")
				.extra_http_header("foo", "bar")
				.extra_http_header("x-mode", "context")
				.build(),
		))
		.await
		.unwrap();
	assert_eq!(request.user_agent(), "My Agent");

	request
		.get(EMPTY, Some(FetchOptions::new().header("X-Mode", "call")))
		.await
		.unwrap();

	let hop = &remote.hops()[0];
	assert_eq!(header(hop, "user-agent"), Some("My Agent"));
	assert_eq!(header(hop, "foo"), Some("bar"));
	assert_eq!(header(hop, "x-mode"), Some("call"));
	assert_eq!(hop.headers.iter().filter(|h| h.name.eq_ignore_ascii_case("x-mode")).count(), 1);
}

#[tokio::test]
async fn test_json_bodies_are_not_double_encoded() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(EMPTY, Reply::new(200));
	let request = pilot.new_request_context(None).await.unwrap();
	let json_call = |data: pilot::RequestData| {
		Some(
			FetchOptions::new()
				.header("content-type", "application/json")
				.data(data),
		)
	};

	request.post(EMPTY, json_call("My post data".into())).await.unwrap();
	request.post(EMPTY, json_call("".into())).await.unwrap();
	request.post(EMPTY, json_call(r#"{"foo":"bar"}"#.into())).await.unwrap();
	request.post(EMPTY, Some(FetchOptions::new().data(json!({"a": 1})))).await.unwrap();
	request.post(EMPTY, Some(FetchOptions::new().data(vec![0u8, 159, 146, 150]))).await.unwrap();

	let hops = remote.hops();
	assert_eq!(posted(&hops[0]), br#""My post data""#);
	assert_eq!(posted(&hops[1]), br#""""#);
	assert_eq!(posted(&hops[2]), br#"{"foo":"bar"}"#);
	assert_eq!(posted(&hops[3]), br#"{"a":1}"#);
	assert_eq!(header(&hops[3], "content-type"), Some("application/json"));
	assert_eq!(posted(&hops[4]), [0u8, 159, 146, 150]);
	assert_eq!(header(&hops[4], "content-type"), Some("application/octet-stream"));
	assert_eq!(header(&hops[4], "content-length"), Some("4"));
}

#[tokio::test]
async fn test_form_and_data_are_exclusive() {
	let (remote, pilot) = FakeRemote::connect().await;
	let request = pilot.new_request_context(None).await.unwrap();
	let err = request
		.post(EMPTY, Some(FetchOptions::new().data("x").form_field("a", "b")))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
	assert!(remote.hops().is_empty());

	remote.route(EMPTY, Reply::new(200));
	request
		.post(EMPTY, Some(FetchOptions::new().form_field("name", "John Doe").form_field("a", "&")))
		.await
		.unwrap();
	let hop = &remote.hops()[0];
	assert_eq!(posted(hop), b"name=John%20Doe&a=%26");
	assert_eq!(header(hop, "content-type"), Some("application/x-www-form-urlencoded"));
}

#[tokio::test]
async fn test_explicit_timeout_fires() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.hang(EMPTY);
	let request = pilot.new_request_context(None).await.unwrap();

	let err = request
		.get(EMPTY, Some(FetchOptions::new().timeout(1.0)))
		.await
		.unwrap_err();
	assert!(err.is_timeout());
	assert_eq!(err.to_string(), "Request timed out after 1ms");
}

#[tokio::test]
async fn test_context_timeout_and_zero_override() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.hang(EMPTY);
	remote.route("http://localhost/fast.html", Reply::new(200));
	let request = pilot
		.new_request_context(Some(RequestContextOptions::builder().timeout(5.0).build()))
		.await
		.unwrap();

	let err = request.get(EMPTY, None).await.unwrap_err();
	assert_eq!(err.to_string(), "Request timed out after 5ms");

	let response = request
		.get("http://localhost/fast.html", Some(FetchOptions::new().timeout(0.0)))
		.await
		.unwrap();
	assert_eq!(response.status(), 200);
	assert_eq!(remote.hops().last().unwrap().timeout, None);
}

#[tokio::test]
async fn test_dispose_cancels_pending_and_invalidates_bodies() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(EMPTY, Reply::new(200).body("kept"));
	remote.hang("http://localhost/slow.html");
	let request = pilot.new_request_context(None).await.unwrap();

	let response = request.get(EMPTY, None).await.unwrap();
	let pending = tokio::spawn({
		let request = Arc::clone(&request);
		async move { request.get("http://localhost/slow.html", None).await }
	});
	while request.pending_operations().is_empty() {
		tokio::task::yield_now().await;
	}

	request.dispose().await.unwrap();
	request.dispose().await.unwrap();

	let err = pending.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ContextDisposed));
	assert_eq!(err.to_string(), "Request context disposed");

	let err = response.body().await.unwrap_err();
	assert_eq!(err.to_string(), "Response has been disposed");

	let err = request.get(EMPTY, None).await.unwrap_err();
	assert!(matches!(err, Error::ContextDisposed));

	assert!(request.pending_operations().is_empty());
	let finished = request.finished_operations();
	assert_eq!(finished.last().unwrap().state, OperationState::Cancelled);
	assert_eq!(remote.calls("dispose").len(), 1);
}

#[tokio::test]
async fn test_redirect_rewrites_post_and_keeps_headers() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route("http://localhost/redirect", Reply::redirect(302, "/empty.html"));
	remote.route(EMPTY, Reply::new(200).body("landed"));
	let request = pilot
		.new_request_context(Some(RequestContextOptions::builder().extra_http_header("foo", "bar").build()))
		.await
		.unwrap();

	let response = request
		.post(
			"http://localhost/redirect",
			Some(FetchOptions::new().header("content-type", "text/plain").data("hello world!!")),
		)
		.await
		.unwrap();
	assert_eq!(response.url(), EMPTY);
	assert_eq!(response.text().await.unwrap(), "landed");

	let hops = remote.hops();
	assert_eq!(hops.len(), 2);
	assert_eq!(hops[0].method, "POST");
	assert_eq!(header(&hops[0], "content-length"), Some("13"));
	assert_eq!(hops[1].method, "GET");
	assert_eq!(hops[1].url, EMPTY);
	assert_eq!(header(&hops[1], "content-length"), None);
	assert!(hops[1].post_data.is_none());
	assert_eq!(header(&hops[0], "foo"), Some("bar"));
	assert_eq!(header(&hops[1], "foo"), Some("bar"));
	assert_eq!(remote.calls("disposeAPIResponse").len(), 1);
}

#[tokio::test]
async fn test_307_keeps_method_and_body() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route("http://localhost/temp", Reply::redirect(307, "http://localhost/empty.html"));
	remote.route(EMPTY, Reply::new(200));
	let request = pilot.new_request_context(None).await.unwrap();

	request
		.post("http://localhost/temp", Some(FetchOptions::new().data(json!({"k": "v"}))))
		.await
		.unwrap();
	let hops = remote.hops();
	assert_eq!(hops[1].method, "POST");
	assert_eq!(posted(&hops[1]), br#"{"k":"v"}"#);
}

#[tokio::test]
async fn test_redirect_limits() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route("http://localhost/a", Reply::redirect(302, "/b"));
	remote.route("http://localhost/b", Reply::redirect(302, "/a"));
	let request = pilot.new_request_context(None).await.unwrap();

	let response = request
		.get("http://localhost/a", Some(FetchOptions::new().max_redirects(0)))
		.await
		.unwrap();
	assert_eq!(response.status(), 302);

	let err = request
		.get("http://localhost/a", Some(FetchOptions::new().max_redirects(3)))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::RequestFailed(_)));
	assert_eq!(err.to_string(), "Request failed: Max redirect count exceeded");
}

#[tokio::test]
async fn test_credentials_are_sent_preemptively() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(EMPTY, Reply::new(200));
	remote.route("http://other.test/", Reply::new(401));
	let request = pilot
		.new_request_context(Some(
			RequestContextOptions::builder()
				.http_credentials(HttpCredentials::new("user", "pass").origin("http://localhost"))
				.build(),
		))
		.await
		.unwrap();

	request.get(EMPTY, None).await.unwrap();
	let response = request.get("http://other.test/", None).await.unwrap();
	assert_eq!(response.status(), 401);

	let hops = remote.hops();
	assert_eq!(header(&hops[0], "authorization"), Some("Basic dXNlcjpwYXNz"));
	assert_eq!(header(&hops[1], "authorization"), None);
	assert_eq!(hops.len(), 2, "401 must not be retried");
}

#[tokio::test]
async fn test_proxy_route_and_auth() {
	let (remote, pilot) = FakeRemote::connect().await;
	let request = pilot
		.new_request_context(Some(
			RequestContextOptions::builder()
				.proxy(ProxySettings::new("localhost:8888").credentials("user", "secret"))
				.build(),
		))
		.await
		.unwrap();

	request.get("http://non-existent.com/simple.json", None).await.unwrap();
	let proxy = remote.hops()[0].proxy.clone().unwrap();
	assert_eq!(proxy.server, "http://localhost:8888");
	assert_eq!(proxy.connect_host, "non-existent.com:80");
	assert_eq!(
		proxy.authorization.as_deref(),
		Some(format!("Basic {}", STANDARD.encode("user:secret")).as_str())
	);
}

#[tokio::test]
async fn test_base_url_params_and_invalid_options() {
	let (remote, pilot) = FakeRemote::connect().await;
	let request = pilot
		.new_request_context(Some(RequestContextOptions::builder().base_url("http://localhost/api/").build()))
		.await
		.unwrap();
	request
		.get("users", Some(FetchOptions::new().param("q", "a b")))
		.await
		.unwrap();
	assert_eq!(remote.hops()[0].url, "http://localhost/api/users?q=a+b");

	let err = pilot
		.new_request_context(Some(RequestContextOptions::builder().base_url("not a url").build()))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
	assert_eq!(remote.calls("newRequest").len(), 1);
}

#[tokio::test]
async fn test_error_statuses_keep_bodies() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route("http://localhost/missing", Reply::new(404).body("not here"));
	let request = pilot.new_request_context(None).await.unwrap();

	let response = request.get("http://localhost/missing", None).await.unwrap();
	assert!(!response.ok());
	assert_eq!(response.status_text(), "Not Found");
	assert_eq!(response.text().await.unwrap(), "not here");

	let err = request
		.get("http://localhost/missing", Some(FetchOptions::new().fail_on_status_code(true)))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "Request failed: 404 Not Found");

	let released = remote.calls("disposeAPIResponse");
	assert_eq!(released.len(), 1);
	assert_eq!(released[0].1["fetchUid"], "fetch-2");
}

#[tokio::test]
async fn test_dispose_during_redirect_chain() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route("http://localhost/redirect", Reply::redirect(302, "/slow.html"));
	remote.hang("http://localhost/slow.html");
	let request = pilot.new_request_context(None).await.unwrap();

	let pending = tokio::spawn({
		let request = Arc::clone(&request);
		async move { request.get("http://localhost/redirect", None).await }
	});
	while remote.hops().len() < 2 {
		tokio::task::yield_now().await;
	}

	request.dispose().await.unwrap();
	let err = pending.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ContextDisposed));
	assert!(request.pending_operations().is_empty());
}

#[tokio::test]
async fn test_ignore_https_errors_on_every_hop() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route("https://localhost/a", Reply::redirect(301, "/b"));
	remote.route("https://localhost/b", Reply::redirect(302, "/c"));
	remote.route("https://localhost/c", Reply::new(200));
	let request = pilot
		.new_request_context(Some(RequestContextOptions::builder().ignore_https_errors(true).build()))
		.await
		.unwrap();

	let response = request.get("https://localhost/a", None).await.unwrap();
	assert_eq!(response.url(), "https://localhost/c");
	let hops = remote.hops();
	assert_eq!(hops.len(), 3);
	assert!(hops.iter().all(|hop| hop.ignore_https_errors));

	request
		.get("https://localhost/a", Some(FetchOptions::new().ignore_https_errors(false)))
		.await
		.unwrap();
	assert!(remote.hops()[3..].iter().all(|hop| !hop.ignore_https_errors));
}

#[tokio::test]
async fn test_display_and_header_views() {
	let (remote, pilot) = FakeRemote::connect().await;
	remote.route(
		EMPTY,
		Reply::new(200)
			.header("Content-Type", "text/plain")
			.header("Set-Cookie", "a=1")
			.header("Set-Cookie", "b=2")
			.body(r#"{"ok":true}"#),
	);
	let request = pilot.new_request_context(None).await.unwrap();
	let response = request.get(EMPTY, None).await.unwrap();

	assert_eq!(
		response.to_string(),
		"APIResponse: 200 OK\n  Content-Type: text/plain\n  Set-Cookie: a=1\n  Set-Cookie: b=2"
	);
	assert_eq!(response.headers_array().len(), 3);
	assert_eq!(response.headers().get("set-cookie").map(String::as_str), Some("b=2"));

	let value: serde_json::Value = response.json().await.unwrap();
	assert_eq!(value["ok"], true);

	response.dispose().await.unwrap();
	assert!(response.body().await.unwrap_err().is_disposed());
}
