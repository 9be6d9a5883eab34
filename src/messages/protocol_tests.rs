//! Tests for backend message construction.

use bytes::BytesMut;

use super::constants::TransactionStatus;
use super::protocol::*;
use crate::errors::{ErrorInfo, Severity};
use crate::types::{Column, FormatCode, oids};

#[test]
fn ready_for_query_statuses() {
    assert_eq!(&ready_for_query(TransactionStatus::Idle)[..], &[b'Z', 0, 0, 0, 5, b'I']);
    assert_eq!(
        &ready_for_query(TransactionStatus::Failed)[..],
        &[b'Z', 0, 0, 0, 5, b'E']
    );
}

#[test]
fn auth_frames() {
    assert_eq!(&auth_ok()[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    assert_eq!(
        &cleartext_password_challenge()[..],
        &[b'R', 0, 0, 0, 8, 0, 0, 0, 3]
    );
    let challenge = md5_challenge(&[1, 2, 3, 4]);
    assert_eq!(&challenge[..], &[b'R', 0, 0, 0, 12, 0, 0, 0, 5, 1, 2, 3, 4]);
}

#[test]
fn md5_scheme_matches_postgres() {
    // Known vector: user "md5_user", password "test_password", salt 0x0a0b0c0d.
    let first = md5_hash_password("md5_user", "test_password");
    let second = md5_hash_second_pass(&first, &[0x0a, 0x0b, 0x0c, 0x0d]);
    assert!(second.starts_with("md5"));
    assert_eq!(second.len(), 35);
    // Stable across calls.
    assert_eq!(second, md5_hash_second_pass(&first, &[0x0a, 0x0b, 0x0c, 0x0d]));
}

#[test]
fn command_complete_is_nul_terminated() {
    let frame = command_complete("SELECT 1");
    assert_eq!(frame[0], b'C');
    assert_eq!(&frame[5..13], b"SELECT 1");
    assert_eq!(frame[13], 0);
}

#[test]
fn single_byte_frames() {
    assert_eq!(&parse_complete()[..], &[b'1', 0, 0, 0, 4]);
    assert_eq!(&bind_complete()[..], &[b'2', 0, 0, 0, 4]);
    assert_eq!(&close_complete()[..], &[b'3', 0, 0, 0, 4]);
    assert_eq!(&no_data()[..], &[b'n', 0, 0, 0, 4]);
    assert_eq!(&portal_suspended()[..], &[b's', 0, 0, 0, 4]);
    assert_eq!(&empty_query_response()[..], &[b'I', 0, 0, 0, 4]);
}

#[test]
fn row_description_layout() {
    let columns = vec![Column::new("?column?", oids::INT4)];
    let frame = row_description(&columns, &[]);
    assert_eq!(frame[0], b'T');
    // field count
    assert_eq!(&frame[5..7], &1i16.to_be_bytes());
    // name
    assert_eq!(&frame[7..16], b"?column?\0");
    // type oid at name + table oid (4) + attnum (2)
    assert_eq!(&frame[22..26], &(oids::INT4 as i32).to_be_bytes());
    // format code is the trailing i16
    assert_eq!(&frame[frame.len() - 2..], &0i16.to_be_bytes());

    let binary = row_description(&columns, &[FormatCode::Binary]);
    assert_eq!(&binary[binary.len() - 2..], &1i16.to_be_bytes());
}

#[test]
fn data_row_nulls_use_minus_one() {
    let frame = data_row(&[Some(BytesMut::from(&b"7"[..])), None]);
    assert_eq!(frame[0], b'D');
    assert_eq!(&frame[5..7], &2i16.to_be_bytes());
    assert_eq!(&frame[7..11], &1i32.to_be_bytes());
    assert_eq!(frame[11], b'7');
    assert_eq!(&frame[12..16], &(-1i32).to_be_bytes());
}

#[test]
fn error_response_fields() {
    let info = ErrorInfo::new("relation does not exist")
        .with_code("42P01")
        .with_severity(Severity::Error)
        .with_hint("create it first");
    let frame = error_response(&info);
    assert_eq!(frame[0], b'E');
    let body = &frame[5..];
    assert!(body.windows(7).any(|w| w == b"SERROR\0"));
    assert!(body.windows(7).any(|w| w == b"C42P01\0"));
    assert!(body.windows(2).any(|w| w[0] == b'H'));
    assert_eq!(body[body.len() - 1], 0);

    let notice = notice_response(&info);
    assert_eq!(notice[0], b'N');
    assert_eq!(&notice[5..], body);
}

#[test]
fn copy_responses_declare_column_formats() {
    let frame = copy_in_response(true, 2);
    assert_eq!(frame[0], b'G');
    assert_eq!(frame[5], 1); // binary
    assert_eq!(&frame[6..8], &2i16.to_be_bytes());
    assert_eq!(&frame[8..10], &1i16.to_be_bytes());
    assert_eq!(&frame[10..12], &1i16.to_be_bytes());

    let out = copy_out_response(false, 1);
    assert_eq!(out[0], b'H');
    assert_eq!(out[5], 0);
}

#[test]
fn startup_parameter_parsing() {
    let payload = BytesMut::from(&b"user\0alice\0database\0app\0\0"[..]);
    let params = parse_startup(payload).unwrap();
    assert_eq!(params.get("user").map(String::as_str), Some("alice"));
    assert_eq!(params.get("database").map(String::as_str), Some("app"));

    let missing_user = BytesMut::from(&b"database\0app\0\0"[..]);
    assert!(parse_startup(missing_user).is_err());

    let uneven = BytesMut::from(&b"user\0alice\0dangling\0\0"[..]);
    assert!(parse_params(uneven).is_err());
}
