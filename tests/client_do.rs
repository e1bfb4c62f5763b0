use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Request as HttpRequest, Response as HttpResponse, Version};
use icap_client::net::Conn;
use icap_client::{Client, ClientOptions, Error, IcapResult, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn count_double_crlf(buf: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i + 4 <= buf.len() {
        if &buf[i..i + 4] == b"\r\n\r\n" {
            count += 1;
            i += 4;
        } else {
            i += 1;
        }
    }
    count
}

/// Read until the request carries `boundaries` double-CRLF section ends, so
/// the whole message is drained before the server replies.
async fn read_request(sock: &mut TcpStream, boundaries: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4096);
    let mut tmp = [0u8; 1024];
    while count_double_crlf(&buf) < boundaries {
        let n = sock.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    buf
}

fn get_request() -> HttpRequest<Vec<u8>> {
    HttpRequest::builder()
        .method("GET")
        .uri("http://someurl.com")
        .header("Host", "someurl.com")
        .body(Vec::new())
        .unwrap()
}

fn post_request(body: &str) -> HttpRequest<Vec<u8>> {
    HttpRequest::builder()
        .method("POST")
        .uri("http://someurl.com")
        .header("Host", "someurl.com")
        .body(body.as_bytes().to_vec())
        .unwrap()
}

fn origin_response(body: &str) -> HttpResponse<Vec<u8>> {
    HttpResponse::builder()
        .status(200)
        .version(Version::HTTP_10)
        .header("Content-Length", body.len().to_string())
        .body(body.as_bytes().to_vec())
        .unwrap()
}

#[tokio::test]
async fn reqmod_no_modifications() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut sock, 2).await;
        sock.write_all(
            b"ICAP/1.0 204 No Modifications\r\n\
              ISTag: \"ABC-123\"\r\n\r\n",
        )
        .await
        .unwrap();
        sock.shutdown().await.unwrap();
    });

    let req = Request::new(
        "REQMOD",
        &format!("icap://{addr}/reqmod"),
        Some(get_request()),
        None,
    )
    .unwrap();

    let client = Client::new(ClientOptions::default());
    let resp = client.send(req).await.unwrap();

    assert_eq!(resp.status_code, 204);
    assert_eq!(resp.status, "No Modifications");
    assert!(resp.content_request.is_none());
    assert!(resp.content_response.is_none());
    assert_eq!(resp.get_header("ISTag").unwrap(), "\"ABC-123\"");

    server.await.unwrap();
}

#[tokio::test]
async fn respmod_returns_the_modified_response() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // the origin body rides in chunked form, so the request ends with
        // the zero-chunk terminator
        let _ = read_request(&mut sock, 4).await;
        sock.write_all(
            b"ICAP/1.0 200 OK\r\n\
              ISTag: \"ABC-123\"\r\n\
              Encapsulated: res-hdr=0, res-body=65\r\n\r\n\
              HTTP/1.1 200 OK\r\n\
              Content-Type: text/plain\r\n\
              Content-Length: 18\r\n\r\n\
              12\r\n\
              File was scrubbed!\r\n\
              0\r\n\r\n",
        )
        .await
        .unwrap();
        sock.shutdown().await.unwrap();
    });

    let req = Request::new(
        "RESPMOD",
        &format!("icap://{addr}/respmod"),
        Some(get_request()),
        Some(origin_response("This is a BAD FILE")),
    )
    .unwrap();

    let client = Client::new(ClientOptions::default());
    let resp = client.send(req).await.unwrap();

    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.status, "OK");
    assert!(resp.content_request.is_none());

    let modified = resp.content_response.expect("embedded response");
    assert_eq!(modified.status(), 200);
    assert_eq!(modified.headers()["Content-Type"], "text/plain");
    assert_eq!(
        modified.body().as_slice(),
        b"12\r\nFile was scrubbed!\r\n0\r\n\r\n"
    );

    server.await.unwrap();
}

#[tokio::test]
async fn options_reply_extends_the_next_request() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut sock, 1).await;
        sock.write_all(
            b"ICAP/1.0 200 OK\r\n\
              Methods: REQMOD\r\n\
              ISTag: \"ABC-123\"\r\n\
              Preview: 1024\r\n\
              Transfer-Preview: *\r\n\
              Allow: 204\r\n\r\n",
        )
        .await
        .unwrap();
        sock.shutdown().await.unwrap();
    });

    let opt_req = Request::new("OPTIONS", &format!("icap://{addr}/reqmod"), None, None)
        .unwrap();

    let client = Client::new(ClientOptions::default());
    let opt_resp = client.send(opt_req).await.unwrap();

    assert_eq!(opt_resp.status_code, 200);
    assert_eq!(opt_resp.preview_bytes, 1024);
    assert_eq!(opt_resp.get_header("Methods").unwrap(), "REQMOD");
    assert_eq!(opt_resp.get_header("Transfer-Preview").unwrap(), "*");

    let mut req = Request::new(
        "REQMOD",
        &format!("icap://{addr}/reqmod"),
        Some(get_request()),
        None,
    )
    .unwrap();
    req.extend_header(&opt_resp.headers);

    assert_eq!(req.headers.get("Preview").unwrap(), "1024");
    assert_eq!(req.headers.get("Methods").unwrap(), "REQMOD");
    let allow: Vec<_> = req.headers.get_all("Allow").iter().collect();
    assert_eq!(allow, ["204"]);

    server.await.unwrap();
}

#[tokio::test]
async fn preview_handshake_over_tcp() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        let first = read_request(&mut sock, 3).await;
        assert!(first.windows(12).any(|w| w == b"Preview: 11\r"));
        sock.write_all(b"ICAP/1.0 100 Continue\r\n\r\n").await.unwrap();

        let remainder = read_request(&mut sock, 1).await;
        assert_eq!(remainder, b"10\r\n! Bye Bye World!\r\n0\r\n\r\n");

        sock.write_all(
            b"ICAP/1.0 204 No Modifications\r\n\
              ISTag: \"ABC-123\"\r\n\r\n",
        )
        .await
        .unwrap();
        sock.shutdown().await.unwrap();
    });

    let mut req = Request::new(
        "REQMOD",
        &format!("icap://{addr}/reqmod"),
        Some(post_request("Hello World! Bye Bye World!")),
        None,
    )
    .unwrap();
    req.set_preview(11).unwrap();

    let client = Client::new(ClientOptions::default());
    let resp = client.send(req).await.unwrap();

    assert_eq!(resp.status_code, 204);
    server.await.unwrap();
}

#[tokio::test]
async fn client_times_out_on_a_silent_server() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = sock.read(&mut buf).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(sock);
    });

    let req = Request::new("OPTIONS", &format!("icap://{addr}/reqmod"), None, None)
        .unwrap();

    let client = Client::new(ClientOptions {
        timeout: Some(Duration::from_millis(200)),
    });
    let err = client.send(req).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got: {err:?}");

    server.abort();
}

// In-memory transport double: replies are scripted, sent payloads recorded.
struct FakeConn {
    replies: Mutex<Vec<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_close: bool,
}

impl FakeConn {
    fn new(replies: Vec<Vec<u8>>) -> Self {
        FakeConn {
            replies: Mutex::new(replies),
            sent: Mutex::new(Vec::new()),
            fail_close: false,
        }
    }

    fn failing_close(replies: Vec<Vec<u8>>) -> Self {
        FakeConn {
            fail_close: true,
            ..FakeConn::new(replies)
        }
    }
}

#[async_trait]
impl Conn for FakeConn {
    async fn connect(&self, _address: &str, _timeout: Option<Duration>) -> IcapResult<()> {
        Ok(())
    }

    async fn send(&self, message: &[u8]) -> IcapResult<Vec<u8>> {
        self.sent.lock().await.push(message.to_vec());
        Ok(self.replies.lock().await.remove(0))
    }

    async fn close(&self) -> IcapResult<()> {
        if self.fail_close {
            return Err(Error::NotConnected);
        }
        Ok(())
    }
}

#[tokio::test]
async fn preview_continuation_is_chunk_wrapped() {
    let fake = Arc::new(FakeConn::new(vec![
        b"ICAP/1.0 100 Continue\r\n\r\n".to_vec(),
        b"ICAP/1.0 204 No Modifications\r\nISTag: \"x\"\r\n\r\n".to_vec(),
    ]));
    let client = Client::with_conn(fake.clone(), ClientOptions { timeout: None });

    let mut req = Request::new(
        "REQMOD",
        "icap://localhost:1344/reqmod",
        Some(post_request("Hello World! Bye Bye World!")),
        None,
    )
    .unwrap();
    req.set_preview(11).unwrap();

    let resp = client.send(req).await.unwrap();
    assert_eq!(resp.status_code, 204);

    let sent = fake.sent.lock().await;
    assert_eq!(sent.len(), 2, "expected a preview flight and a remainder");
    let first = String::from_utf8(sent[0].clone()).unwrap();
    assert!(first.contains("Preview: 11\r\n"));
    assert!(first.ends_with("0\r\n\r\n"));
    assert!(!first.contains("ieof"));
    assert_eq!(sent[1], b"10\r\n! Bye Bye World!\r\n0\r\n\r\n");
}

#[tokio::test]
async fn fitted_preview_needs_no_continuation() {
    let fake = Arc::new(FakeConn::new(vec![
        b"ICAP/1.0 204 No Modifications\r\nISTag: \"x\"\r\n\r\n".to_vec(),
    ]));
    let client = Client::with_conn(fake.clone(), ClientOptions { timeout: None });

    let mut req = Request::new(
        "REQMOD",
        "icap://localhost:1344/reqmod",
        Some(post_request("Hello!")),
        None,
    )
    .unwrap();
    req.set_preview(11).unwrap();

    let resp = client.send(req).await.unwrap();
    assert_eq!(resp.status_code, 204);

    let sent = fake.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].ends_with(b"0; ieof\r\n\r\n"));
}

#[tokio::test]
async fn close_failure_after_a_clean_exchange_is_surfaced() {
    let fake = Arc::new(FakeConn::failing_close(vec![
        b"ICAP/1.0 204 No Modifications\r\nISTag: \"x\"\r\n\r\n".to_vec(),
    ]));
    let client = Client::with_conn(fake, ClientOptions { timeout: None });

    let req = Request::new("OPTIONS", "icap://localhost:1344/reqmod", None, None).unwrap();

    let err = client.send(req).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected), "got: {err:?}");
}

#[tokio::test]
async fn close_failure_is_joined_to_the_exchange_error() {
    // the short status line makes the exchange fail; the close fails too
    let fake = Arc::new(FakeConn::failing_close(vec![
        b"ICAP/1.0 200\r\nISTag: \"x\"\r\n\r\n".to_vec(),
    ]));
    let client = Client::with_conn(fake, ClientOptions { timeout: None });

    let req = Request::new("OPTIONS", "icap://localhost:1344/reqmod", None, None).unwrap();

    let err = client.send(req).await.unwrap_err();
    match err {
        Error::Joined(primary, close) => {
            assert!(
                matches!(*primary, Error::InvalidTcpMessage(_)),
                "got primary: {primary:?}"
            );
            assert!(matches!(*close, Error::NotConnected), "got close: {close:?}");
        }
        other => panic!("expected joined error, got: {other:?}"),
    }
}

#[tokio::test]
async fn bare_100_continue_without_preview_is_surfaced() {
    let fake = Arc::new(FakeConn::new(vec![
        b"ICAP/1.0 100 Continue\r\n\r\n".to_vec(),
    ]));
    let client = Client::with_conn(fake.clone(), ClientOptions { timeout: None });

    let req = Request::new(
        "REQMOD",
        "icap://localhost:1344/reqmod",
        Some(post_request("Hello World")),
        None,
    )
    .unwrap();

    let resp = client.send(req).await.unwrap();
    assert_eq!(resp.status_code, 100);
    assert_eq!(fake.sent.lock().await.len(), 1);
}
