//! Session tests against a scripted peer: the server side of a duplex
//! pipe is pre-loaded with hand-assembled reply messages and the
//! session's observable behavior is checked event by event.

#![allow(clippy::unwrap_used)]

use tds_session::{
    BatchOutcome, Error, PrepareStrategy, Session, SessionConfig, SessionEvent, SqlRequest,
};
use tds_session::{Parameter, ServerKind, SqlValue, TdsVersion};
use tokio::io::{AsyncWriteExt, DuplexStream};

fn wide(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Frame a token stream as a single-packet server reply.
fn reply(tokens: &[u8]) -> Vec<u8> {
    let len = u16::try_from(tokens.len() + 8).unwrap();
    let mut out = vec![0x04, 0x01];
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
    out.extend_from_slice(tokens);
    out
}

fn done(tag: u8, status: u8, operation: u8, count: i32) -> Vec<u8> {
    let mut out = vec![tag, status, 0x00, operation, 0x00];
    out.extend_from_slice(&count.to_le_bytes());
    out
}

fn framed(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&u16::try_from(body.len()).unwrap().to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn env_database_wide(new: &str, old: &str) -> Vec<u8> {
    let mut body = vec![1];
    body.push(u8::try_from(new.chars().count()).unwrap());
    body.extend_from_slice(&wide(new));
    body.push(u8::try_from(old.chars().count()).unwrap());
    body.extend_from_slice(&wide(old));
    framed(0xE3, &body)
}

fn env_packet_size_wide(size: &str) -> Vec<u8> {
    let mut body = vec![4];
    body.push(u8::try_from(size.chars().count()).unwrap());
    body.extend_from_slice(&wide(size));
    body.push(0);
    framed(0xE3, &body)
}

fn login_ack_wide(product: &str) -> Vec<u8> {
    let mut body = vec![1, 0x07, 0x00, 0x00, 0x00];
    body.push(u8::try_from(product.chars().count()).unwrap());
    body.extend_from_slice(&wide(product));
    // server version 8.0 build 194
    body.extend_from_slice(&[8, 0]);
    body.extend_from_slice(&194u16.to_be_bytes());
    framed(0xAD, &body)
}

/// One-column TDS 7.0 result metadata: a nullable `int` named `name`.
fn colmeta_int_wide(name: &str) -> Vec<u8> {
    let mut out = vec![0x81, 0x01, 0x00];
    out.extend_from_slice(&[0x00, 0x00]); // user type
    out.extend_from_slice(&[0x01, 0x00]); // flags: nullable
    out.extend_from_slice(&[0x26, 0x04]); // INTN, max 4
    out.push(u8::try_from(name.chars().count()).unwrap());
    out.extend_from_slice(&wide(name));
    out
}

fn row_int(value: i32) -> Vec<u8> {
    let mut out = vec![0xD1, 0x04];
    out.extend_from_slice(&value.to_le_bytes());
    out
}

fn error_wide(number: i32, severity: u8, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&number.to_le_bytes());
    body.push(1); // state
    body.push(severity);
    body.extend_from_slice(&u16::try_from(message.chars().count()).unwrap().to_le_bytes());
    body.extend_from_slice(&wide(message));
    body.push(0); // server name
    body.push(0); // procedure name
    body.extend_from_slice(&1u16.to_le_bytes()); // line
    framed(0xAA, &body)
}

fn error_narrow(number: i32, severity: u8, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&number.to_le_bytes());
    body.push(1);
    body.push(severity);
    body.extend_from_slice(&u16::try_from(message.len()).unwrap().to_le_bytes());
    body.extend_from_slice(message.as_bytes());
    body.push(0);
    body.push(0);
    body.extend_from_slice(&1u16.to_le_bytes());
    framed(0xAA, &body)
}

/// Output parameter token carrying an `int` value.
fn output_param_int_wide(name: &str, value: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(u8::try_from(name.chars().count()).unwrap());
    body.extend_from_slice(&wide(name));
    body.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00]); // status, user type
    body.extend_from_slice(&[0x26, 0x04, 0x04]);
    body.extend_from_slice(&value.to_le_bytes());
    framed(0xAC, &body)
}

fn session(
    version: TdsVersion,
    server: ServerKind,
) -> (Session<DuplexStream>, DuplexStream) {
    let (client, peer) = tokio::io::duplex(65536);
    let config = SessionConfig::new(version, server).credentials("sa", "secret");
    (Session::new(client, config), peer)
}

#[tokio::test]
async fn login_applies_environment_and_ack() {
    let (mut session, mut peer) = session(TdsVersion::V7_0, ServerKind::SqlServer);

    let mut tokens = Vec::new();
    tokens.extend_from_slice(&env_database_wide("pubs", "master"));
    tokens.extend_from_slice(&env_packet_size_wide("1024"));
    tokens.extend_from_slice(&login_ack_wide("Microsoft SQL Server"));
    tokens.extend_from_slice(&done(0xFD, 0x00, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    session.login().await.unwrap();
    assert_eq!(session.database(), "pubs");
    assert_eq!(session.packet_size(), 1024);
    assert_eq!(session.product(), Some("Microsoft SQL Server"));
}

#[tokio::test]
async fn select_streams_columns_rows_and_done() {
    let (mut session, mut peer) = session(TdsVersion::V7_0, ServerKind::SqlServer);

    let mut tokens = Vec::new();
    tokens.extend_from_slice(&colmeta_int_wide("id"));
    tokens.extend_from_slice(&row_int(5));
    tokens.extend_from_slice(&row_int(7));
    tokens.extend_from_slice(&env_packet_size_wide("2048"));
    // 0xC1 is a SELECT completion; its row count is rows-sent, not a count.
    tokens.extend_from_slice(&done(0xFD, 0x10, 0xC1, 2));
    peer.write_all(&reply(&tokens)).await.unwrap();

    session
        .execute(&mut SqlRequest::batch("select id from t"))
        .await
        .unwrap();

    match session.next_event().await.unwrap() {
        Some(SessionEvent::ResultSet(columns)) => {
            assert_eq!(columns.len(), 1);
            assert_eq!(columns[0].name, "id");
            assert!(columns[0].nullable);
        }
        other => panic!("expected result set, got {other:?}"),
    }
    assert_eq!(session.columns().len(), 1);

    match session.next_event().await.unwrap() {
        Some(SessionEvent::Row(values)) => assert_eq!(values, vec![SqlValue::Int(5)]),
        other => panic!("expected row, got {other:?}"),
    }
    match session.next_event().await.unwrap() {
        Some(SessionEvent::Row(values)) => assert_eq!(values, vec![SqlValue::Int(7)]),
        other => panic!("expected row, got {other:?}"),
    }

    match session.next_event().await.unwrap() {
        Some(SessionEvent::Done {
            count,
            error,
            more,
            ..
        }) => {
            assert_eq!(count, None);
            assert!(!error);
            assert!(!more);
        }
        other => panic!("expected done, got {other:?}"),
    }
    assert!(session.next_event().await.unwrap().is_none());

    // The mid-response renegotiation took effect.
    assert_eq!(session.packet_size(), 2048);
}

#[tokio::test]
async fn server_error_fails_the_batch() {
    let (mut session, mut peer) = session(TdsVersion::V7_0, ServerKind::SqlServer);

    let mut tokens = Vec::new();
    tokens.extend_from_slice(&error_wide(102, 15, "Incorrect syntax near 'frm'."));
    tokens.extend_from_slice(&done(0xFD, 0x02, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    let err = session.submit_sql("select 1 frm t").await.unwrap_err();
    match err {
        Error::Server(diag) => {
            assert_eq!(diag.number, 102);
            assert_eq!(diag.severity, 15);
        }
        other => panic!("expected server error, got {other:?}"),
    }

    // Severity 15 is not fatal; the session stays usable.
    peer.write_all(&reply(&done(0xFD, 0x00, 0x00, 0)))
        .await
        .unwrap();
    session.submit_sql("select 1").await.unwrap();
}

#[tokio::test]
async fn sql_server_batch_stops_at_first_failure() {
    let (mut session, mut peer) = session(TdsVersion::V7_0, ServerKind::SqlServer);

    let mut tokens = Vec::new();
    tokens.extend_from_slice(&done(0xFF, 0x11, 0x00, 2));
    tokens.extend_from_slice(&error_wide(208, 16, "Invalid object name 'nope'."));
    tokens.extend_from_slice(&done(0xFF, 0x03, 0x00, 0));
    tokens.extend_from_slice(&done(0xFD, 0x00, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    let outcomes = session
        .execute_batch(&["update a set x = 1", "delete from nope", "update b set x = 1"])
        .await
        .unwrap();
    // The third statement never ran; no outcome is invented for it.
    assert_eq!(
        outcomes,
        vec![BatchOutcome::Completed(Some(2)), BatchOutcome::Failed]
    );
    // Failures surface through the outcomes, not the error chain.
    assert!(session.diagnostics().is_empty());
}

#[tokio::test]
async fn sybase_batch_continues_past_failure() {
    let (mut session, mut peer) = session(TdsVersion::V5_0, ServerKind::Sybase);

    let mut tokens = Vec::new();
    tokens.extend_from_slice(&done(0xFD, 0x11, 0x00, 1));
    tokens.extend_from_slice(&error_narrow(208, 16, "nope not found"));
    tokens.extend_from_slice(&done(0xFD, 0x02, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    let outcomes = session
        .execute_batch(&["update a set x = 1", "delete from nope"])
        .await
        .unwrap();
    assert_eq!(
        outcomes,
        vec![BatchOutcome::Completed(Some(1)), BatchOutcome::Failed]
    );
}

#[tokio::test]
async fn cancel_drains_until_acknowledged() {
    let (mut session, mut peer) = session(TdsVersion::V7_0, ServerKind::SqlServer);

    // A partial result the cancellation interrupts, then the
    // acknowledging completion.
    let mut tokens = Vec::new();
    tokens.extend_from_slice(&colmeta_int_wide("id"));
    tokens.extend_from_slice(&row_int(1));
    tokens.extend_from_slice(&done(0xFD, 0x20, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    session
        .execute(&mut SqlRequest::batch("select id from huge"))
        .await
        .unwrap();
    session.cancel().await.unwrap();

    // The acknowledgement consumed the whole response and left a clean
    // slate.
    assert!(session.next_event().await.unwrap().is_none());
    assert!(session.diagnostics().is_empty());
}

#[tokio::test]
async fn handle_prepare_round_trip() {
    let (client, mut peer) = tokio::io::duplex(65536);
    let config = SessionConfig::new(TdsVersion::V7_0, ServerKind::SqlServer)
        .credentials("sa", "secret")
        .prepare_strategy(PrepareStrategy::Handle);
    let mut session = Session::new(client, config);

    // sp_prepare reply: the handle comes back as an output parameter.
    let mut tokens = Vec::new();
    tokens.extend_from_slice(&output_param_int_wide("@handle", 7));
    tokens.extend_from_slice(&[0x79, 0x00, 0x00, 0x00, 0x00]); // return status 0
    tokens.extend_from_slice(&done(0xFE, 0x00, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    let mut params = vec![Parameter::input(SqlValue::Int(0))];
    let stmt = session
        .prepare("select * from t where id = ?", &mut params)
        .await
        .unwrap();
    assert!(stmt.is_server_side());

    // sp_unprepare reply.
    peer.write_all(&reply(&done(0xFE, 0x00, 0x00, 0)))
        .await
        .unwrap();
    session.unprepare(&stmt).await.unwrap();
}

#[tokio::test]
async fn prepexec_prepares_and_runs_in_one_round_trip() {
    let (client, mut peer) = tokio::io::duplex(65536);
    let config = SessionConfig::new(TdsVersion::V7_0, ServerKind::SqlServer)
        .credentials("sa", "secret")
        .prepare_strategy(PrepareStrategy::PrepareExec);
    let mut session = Session::new(client, config);

    // sp_prepexec reply: the first execution's rows arrive with the handle.
    let mut tokens = Vec::new();
    tokens.extend_from_slice(&colmeta_int_wide("id"));
    tokens.extend_from_slice(&row_int(1));
    tokens.extend_from_slice(&output_param_int_wide("@handle", 42));
    tokens.extend_from_slice(&done(0xFE, 0x00, 0x00, 0));
    peer.write_all(&reply(&tokens)).await.unwrap();

    let mut params = vec![Parameter::input(SqlValue::Int(1))];
    let stmt = session
        .prepare("select id from t where id = ?", &mut params)
        .await
        .unwrap();
    assert!(stmt.is_server_side());
}

#[tokio::test]
async fn literal_strategy_never_touches_the_server_on_prepare() {
    let (client, mut peer) = tokio::io::duplex(65536);
    let config = SessionConfig::new(TdsVersion::V7_0, ServerKind::SqlServer)
        .credentials("sa", "secret")
        .prepare_strategy(PrepareStrategy::Literal);
    let mut session = Session::new(client, config);

    let mut params = vec![Parameter::input(SqlValue::Int(3))];
    let stmt = session
        .prepare("select id from t where id = ?", &mut params)
        .await
        .unwrap();
    assert!(!stmt.is_server_side());

    // Execution substitutes the value and goes out as a plain batch.
    peer.write_all(&reply(&done(0xFD, 0x00, 0x00, 0)))
        .await
        .unwrap();
    session
        .execute_prepared(&stmt, vec![Parameter::input(SqlValue::Int(3))])
        .await
        .unwrap();
    session.finish_response().await.unwrap();
}
