//! Shared fixtures for member tests.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use raconteur_stub::{field, FieldRecord, FlatRecord, NamedArrayKind, PodKind, Record, TypeRegistry};
use raconteur_transport::{Endpoint, LoopbackEndpoint};
use raconteur_value::{ElementList, MessageElement, Result};

use crate::service::{ServiceClient, ServiceHost};

/// A host with one attached client.
pub fn link() -> (Arc<ServiceHost>, Arc<ServiceClient>) {
    link_with(None)
}

pub fn link_with(registry: Option<Arc<TypeRegistry>>) -> (Arc<ServiceHost>, Arc<ServiceClient>) {
    let host = match &registry {
        Some(registry) => ServiceHost::with_registry("test", Arc::clone(registry)),
        None => ServiceHost::new("test"),
    };
    let (service_side, client_side) = LoopbackEndpoint::pair().unwrap();
    host.attach(Arc::new(service_side));
    let client_side: Arc<dyn Endpoint> = Arc::new(client_side);
    let client = match registry {
        Some(registry) => ServiceClient::with_registry(client_side, registry),
        None => ServiceClient::connect(client_side),
    };
    (host, client)
}

/// Attach another client to `host`, returning its loopback side as well.
pub fn connect(host: &Arc<ServiceHost>) -> (Arc<ServiceClient>, Arc<LoopbackEndpoint>) {
    let (service_side, client_side) = LoopbackEndpoint::pair().unwrap();
    host.attach(Arc::new(service_side));
    let client_side = Arc::new(client_side);
    let endpoint: Arc<dyn Endpoint> = client_side.clone();
    (ServiceClient::connect(endpoint), client_side)
}

pub fn wait_for(check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached");
}

/// Pod record used by memory and pipe tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub seq: u32,
    pub data: [i16; 4],
}

impl Frame {
    pub fn numbered(n: u32) -> Self {
        let base = n as i16;
        Self {
            seq: n,
            data: [base, base.wrapping_mul(2), -base, 7],
        }
    }
}

impl Record for Frame {
    type Kind = PodKind;
    const TYPE_NAME: &'static str = "example.telemetry.Frame";
}

impl FieldRecord for Frame {
    fn pack_fields(&self) -> Result<Vec<MessageElement>> {
        Ok(vec![
            MessageElement::scalar("seq", self.seq),
            MessageElement::numeric("data", self.data.to_vec()),
        ])
    }

    fn unpack_fields(list: &ElementList) -> Result<Self> {
        Ok(Self {
            seq: field::scalar(list, "seq")?,
            data: field::fixed_array(list, "data")?,
        })
    }
}

/// Named array record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Record for Point {
    type Kind = NamedArrayKind;
    const TYPE_NAME: &'static str = "example.geometry.Point";
}

impl FlatRecord for Point {
    type Element = f32;
    const ELEMENT_COUNT: usize = 2;

    fn flatten(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&[self.x, self.y]);
    }

    fn restore(values: &[f32]) -> Self {
        Self::new(values[0], values[1])
    }
}
