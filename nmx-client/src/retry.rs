//! Transport-independent operations with the uniform retry policy.
//!
//! Only response timeouts are retried. Every other error, and the final
//! timeout once attempts are exhausted, is returned to the caller unchanged.

use crate::error::ClientError;
use crate::options::TxOptions;
use crate::session::{ResourceType, Session};
use bytes::Bytes;
use nmx_protocol::{cbor, oic, CborMap, CoapCode, NmpMsg};
use std::future::Future;

async fn with_retry<T, F, Fut>(opts: &TxOptions, mut send_once: F) -> Result<T, ClientError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    opts.validate()?;
    let retries = opts.tries - 1;

    let mut attempt = 0;
    loop {
        let err = match send_once(attempt).await {
            Ok(rsp) => return Ok(rsp),
            Err(err) => err,
        };

        if !err.is_rsp_timeout() || attempt >= retries {
            tracing::debug!("attempt {}/{} failed: {}", attempt + 1, opts.tries, err);
            return Err(err);
        }

        tracing::debug!(
            "attempt {}/{} timed out, retrying",
            attempt + 1,
            opts.tries
        );
        if !opts.retry_delay.is_zero() {
            tokio::time::sleep(opts.retry_delay).await;
        }
        attempt += 1;
    }
}

/// Sends an NMP message with retry.
///
/// Each retry carries a fresh sequence number, so a late response to an
/// abandoned attempt cannot complete a newer one.
pub async fn tx_nmp(s: &dyn Session, msg: &NmpMsg, opts: &TxOptions) -> Result<NmpMsg, ClientError> {
    with_retry(opts, |attempt| {
        let msg = if attempt == 0 {
            msg.clone()
        } else {
            msg.with_seq(s.next_seq())
        };
        async move { s.transmit_nmp_once(&msg, opts).await }
    })
    .await
}

/// Reads a resource with retry.
pub async fn get_resource(
    s: &dyn Session,
    res_type: ResourceType,
    uri: &str,
    opts: &TxOptions,
) -> Result<(CoapCode, Bytes), ClientError> {
    with_retry(opts, |_| async move {
        let req = oic::create_get(true, uri, s.next_token())?;
        s.transmit_coap_once(&req, res_type, opts).await
    })
    .await
}

/// Writes a resource with retry.
pub async fn put_resource(
    s: &dyn Session,
    res_type: ResourceType,
    uri: &str,
    value: Bytes,
    opts: &TxOptions,
) -> Result<(CoapCode, Bytes), ClientError> {
    with_retry(opts, |_| {
        let value = value.clone();
        async move {
            let req = oic::create_put(true, uri, s.next_token(), value)?;
            s.transmit_coap_once(&req, res_type, opts).await
        }
    })
    .await
}

/// Posts to a resource with retry.
pub async fn post_resource(
    s: &dyn Session,
    res_type: ResourceType,
    uri: &str,
    value: Bytes,
    opts: &TxOptions,
) -> Result<(CoapCode, Bytes), ClientError> {
    with_retry(opts, |_| {
        let value = value.clone();
        async move {
            let req = oic::create_post(true, uri, s.next_token(), value)?;
            s.transmit_coap_once(&req, res_type, opts).await
        }
    })
    .await
}

/// Deletes a resource with retry.
pub async fn delete_resource(
    s: &dyn Session,
    res_type: ResourceType,
    uri: &str,
    opts: &TxOptions,
) -> Result<(CoapCode, Bytes), ClientError> {
    with_retry(opts, |_| async move {
        let req = oic::create_delete(true, uri, s.next_token())?;
        s.transmit_coap_once(&req, res_type, opts).await
    })
    .await
}

/// Writes a CBOR map to a resource and decodes the CBOR map it returns.
///
/// Encoding happens before the first transmission and decoding after the last;
/// neither is retried.
pub async fn put_cbor_resource(
    s: &dyn Session,
    res_type: ResourceType,
    uri: &str,
    value: &CborMap,
    opts: &TxOptions,
) -> Result<(CoapCode, CborMap), ClientError> {
    let encoded = Bytes::from(cbor::encode(value)?);
    let (code, body) = put_resource(s, res_type, uri, encoded, opts).await?;
    let map = cbor::decode(&body)?;
    Ok((code, map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSession, Step};
    use nmx_protocol::nmp::{group, id};
    use nmx_protocol::{Method, NmpOp, ProtocolError};
    use std::time::Duration;

    fn opts(tries: u32) -> TxOptions {
        TxOptions::new()
            .with_tries(tries)
            .with_timeout(Duration::from_millis(50))
    }

    fn echo_msg() -> NmpMsg {
        NmpMsg::new(NmpOp::Write, group::DEFAULT, id::DEF_ECHO, 0)
            .with_body(CborMap::new().with("d", "hi"))
    }

    #[tokio::test]
    async fn test_succeeds_iff_timeouts_below_tries() {
        for n in 1..=4u32 {
            for k in 0..=5usize {
                let s = MockSession::timeouts_then(k, Step::NmpBody(CborMap::new()));
                let result = tx_nmp(&s, &echo_msg(), &opts(n)).await;

                assert_eq!(result.is_ok(), k < n as usize, "n={n} k={k}");
                assert_eq!(s.attempts(), (k + 1).min(n as usize), "n={n} k={k}");
                if let Err(e) = result {
                    assert!(e.is_rsp_timeout());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_always_timeout_makes_exactly_n_attempts() {
        let s = MockSession::new(vec![]);
        let err = tx_nmp(&s, &echo_msg(), &opts(3)).await.unwrap_err();
        assert!(matches!(err, ClientError::RspTimeout(_)));
        assert_eq!(s.attempts(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_not_retried() {
        let s = MockSession::new(vec![Step::TransportError("link down")]);
        let err = tx_nmp(&s, &echo_msg(), &opts(1)).await.unwrap_err();
        assert_eq!(s.attempts(), 1);
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "I/O error: link down");

        let s = MockSession::new(vec![Step::TransportError("link down")]);
        tx_nmp(&s, &echo_msg(), &opts(5)).await.unwrap_err();
        assert_eq!(s.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_use_fresh_sequence_numbers() {
        let s = MockSession::timeouts_then(2, Step::NmpBody(CborMap::new()));
        tx_nmp(&s, &echo_msg().with_seq(200), &opts(3)).await.unwrap();

        let seqs: Vec<u8> = s.nmp_sent.lock().iter().map(|m| m.hdr.seq).collect();
        assert_eq!(seqs.len(), 3);
        assert_eq!(seqs[0], 200);
        assert_ne!(seqs[1], seqs[0]);
        assert_ne!(seqs[2], seqs[1]);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_sending() {
        let s = MockSession::new(vec![]);
        let bad = TxOptions {
            tries: 0,
            ..opts(1)
        };
        let err = tx_nmp(&s, &echo_msg(), &bad).await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert_eq!(s.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_between_attempts() {
        let s = MockSession::timeouts_then(1, Step::NmpBody(CborMap::new()));
        let o = opts(2).with_retry_delay(Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        tx_nmp(&s, &echo_msg(), &o).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_get_resource_new_token_per_attempt() {
        let s = MockSession::timeouts_then(1, Step::Coap(CoapCode::CONTENT, Bytes::new()));
        let (code, _) = get_resource(&s, ResourceType::Public, "/dev", &opts(2))
            .await
            .unwrap();
        assert_eq!(code, CoapCode::CONTENT);

        let sent = s.coap_sent.lock();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].token(), sent[1].token());
        assert!(sent.iter().all(|r| r.method() == Method::Get && r.is_confirmable()));
    }

    #[tokio::test]
    async fn test_resource_methods() {
        let s = MockSession::new(vec![
            Step::Coap(CoapCode::CHANGED, Bytes::new()),
            Step::Coap(CoapCode::CREATED, Bytes::new()),
            Step::Coap(CoapCode::DELETED, Bytes::new()),
        ]);
        let o = opts(1);

        put_resource(&s, ResourceType::Public, "/echo", Bytes::from_static(b"ab"), &o)
            .await
            .unwrap();
        post_resource(&s, ResourceType::Secure, "/echo", Bytes::from_static(b"cd"), &o)
            .await
            .unwrap();
        let (code, _) = delete_resource(&s, ResourceType::Public, "/echo", &o)
            .await
            .unwrap();
        assert_eq!(code, CoapCode::DELETED);

        let sent = s.coap_sent.lock();
        assert_eq!(sent[0].method(), Method::Put);
        assert_eq!(sent[0].payload().unwrap().as_ref(), b"ab");
        assert_eq!(sent[1].method(), Method::Post);
        assert_eq!(sent[2].method(), Method::Delete);
        assert!(sent[2].payload().is_none());
    }

    #[tokio::test]
    async fn test_invalid_path_is_fatal() {
        let s = MockSession::new(vec![]);
        let err = get_resource(&s, ResourceType::Public, "", &opts(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidPath(_))
        ));
        assert_eq!(s.attempts(), 0);
    }

    #[tokio::test]
    async fn test_put_cbor_resource_roundtrip() {
        let reply = cbor::encode(&CborMap::new().with("r", "ok")).unwrap();
        let s = MockSession::timeouts_then(1, Step::Coap(CoapCode::CHANGED, Bytes::from(reply)));
        let value = CborMap::new().with("d", "hello");

        let (code, map) = put_cbor_resource(&s, ResourceType::Public, "/echo", &value, &opts(2))
            .await
            .unwrap();
        assert_eq!(code, CoapCode::CHANGED);
        assert_eq!(map.get_text("r").unwrap(), Some("ok"));

        let sent = s.coap_sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(cbor::decode(sent[1].payload().unwrap()).unwrap(), value);
    }

    #[tokio::test]
    async fn test_put_cbor_resource_decode_failure_not_retried() {
        let s = MockSession::new(vec![Step::Coap(
            CoapCode::CHANGED,
            Bytes::from_static(&[0xa1]),
        )]);
        let err = put_cbor_resource(&s, ResourceType::Public, "/echo", &CborMap::new(), &opts(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::CborDecode(_))));
        assert_eq!(s.attempts(), 1);
    }

    #[tokio::test]
    async fn test_put_cbor_resource_propagates_transport_error() {
        let s = MockSession::new(vec![Step::TransportError("gone")]);
        let err = put_cbor_resource(&s, ResourceType::Public, "/echo", &CborMap::new(), &opts(3))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
