// src/transport/mqtt.rs
use anyhow::{bail, Context, Result};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS,
    SubAck, SubscribeReasonCode, Transport as MqttTransport,
};
use std::time::Duration;

use super::EventSource;
use crate::config::BrokerConfig;

/// Push subscriber on an MQTT topic, QoS 0 (at-most-once).
pub struct MqttSource {
    options: MqttOptions,
    topic: String,
    capacity: usize,
    session: Option<(AsyncClient, EventLoop)>,
}

impl MqttSource {
    pub fn new(cfg: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        options.set_max_packet_size(cfg.max_packet_bytes, cfg.max_packet_bytes);
        if cfg.use_tls {
            options.set_transport(MqttTransport::tls_with_default_config());
        }

        Self {
            options,
            topic: cfg.topic.clone(),
            capacity: cfg.channel_capacity.max(1),
            session: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// A refused subscription must not count as live.
fn check_suback(ack: &SubAck, topic: &str) -> Result<()> {
    if ack.return_codes.is_empty()
        || ack
            .return_codes
            .iter()
            .any(|c| matches!(c, SubscribeReasonCode::Failure))
    {
        bail!("broker refused subscription to {topic}: {:?}", ack.return_codes);
    }
    Ok(())
}

#[async_trait::async_trait]
impl EventSource for MqttSource {
    async fn connect(&mut self) -> Result<()> {
        // Fresh client per attempt; reconnect pacing belongs to the transport loop.
        self.session = None;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), self.capacity);
        client
            .subscribe(self.topic.as_str(), QoS::AtMostOnce)
            .await
            .context("queue mqtt subscribe")?;

        loop {
            match eventloop.poll().await.context("mqtt connect")? {
                MqttEvent::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code != ConnectReturnCode::Success {
                        bail!("broker refused connection: {:?}", ack.code);
                    }
                }
                MqttEvent::Incoming(Packet::SubAck(ack)) => {
                    check_suback(&ack, &self.topic)?;
                    break;
                }
                _ => {}
            }
        }

        tracing::info!(target: "transport", topic = %self.topic, "mqtt subscribed");
        self.session = Some((client, eventloop));
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let outcome = {
            let Some((_, eventloop)) = self.session.as_mut() else {
                return Ok(None);
            };
            loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::Publish(p))) => {
                        break Ok(Some(p.payload.to_vec()))
                    }
                    Ok(MqttEvent::Incoming(Packet::Disconnect)) => break Ok(None),
                    Ok(_) => {}
                    Err(e) => break Err(e),
                }
            }
        };

        match outcome {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => {
                self.session = None;
                Ok(None)
            }
            Err(e) => {
                self.session = None;
                Err(anyhow::Error::new(e).context("mqtt connection lost"))
            }
        }
    }

    async fn close(&mut self) {
        if let Some((client, _)) = self.session.take() {
            let _ = client.try_disconnect();
        }
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_without_session_reports_closed() {
        let mut src = MqttSource::new(&BrokerConfig::default());
        assert_eq!(src.topic(), "humanrecog/video/jonathan_feed");
        assert!(src.recv().await.unwrap().is_none());
    }

    #[test]
    fn refused_subscription_is_an_error() {
        let granted = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
        };
        assert!(check_suback(&granted, "t").is_ok());

        let refused = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Failure],
        };
        let err = check_suback(&refused, "t").unwrap_err();
        assert!(err.to_string().contains("refused"), "{err}");

        let empty = SubAck {
            pkid: 1,
            return_codes: vec![],
        };
        assert!(check_suback(&empty, "t").is_err());
    }
}
