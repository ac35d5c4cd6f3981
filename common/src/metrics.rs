//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0
use std::fs::File;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct RawMetrics {
    protocol_name: String,
    request_id: Option<String>,
    own_input_size: Option<usize>,
    partner_extract_size: Option<usize>,
    intersection_size: Option<usize>,
}

impl RawMetrics {
    fn save_metrics(&self, path: &str) -> Result<(), std::io::Error> {
        let f = File::create(path)?;
        serde_json::to_writer(f, &self)?;
        Ok(())
    }

    fn print_metrics(&self) {
        match serde_json::to_string(&self) {
            Ok(s) => {
                println!("-----BEGIN METRIC VIEW-----");
                println!("{}", s);
                println!("-----END METRIC VIEW-----");
            }
            Err(e) => error!("Cannot serialize metrics: {}", e),
        }
    }
}

/// Size counters of one finished match, shared across tasks
pub struct Metrics {
    protocol_name: String,
    request_id: Arc<RwLock<Option<String>>>,
    own_input_size: Arc<RwLock<Option<usize>>>,
    partner_extract_size: Arc<RwLock<Option<usize>>>,
    intersection_size: Arc<RwLock<Option<usize>>>,
}

fn set<T>(cell: &RwLock<Option<T>>, value: T) {
    match cell.write() {
        Ok(mut d) => *d = Some(value),
        Err(poisoned) => *poisoned.into_inner() = Some(value),
    }
}

fn get<T: Clone>(cell: &RwLock<Option<T>>) -> Option<T> {
    match cell.read() {
        Ok(d) => d.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

impl Metrics {
    pub fn new(protocol_name: &str) -> Metrics {
        Metrics {
            protocol_name: protocol_name.to_string(),
            request_id: Arc::new(RwLock::default()),
            own_input_size: Arc::new(RwLock::default()),
            partner_extract_size: Arc::new(RwLock::default()),
            intersection_size: Arc::new(RwLock::default()),
        }
    }

    fn cp_to_raw(&self) -> RawMetrics {
        RawMetrics {
            protocol_name: self.protocol_name.clone(),
            request_id: get(&self.request_id),
            own_input_size: get(&self.own_input_size),
            partner_extract_size: get(&self.partner_extract_size),
            intersection_size: get(&self.intersection_size),
        }
    }

    pub fn set_request_id(&self, request_id: &str) {
        set(&self.request_id, request_id.to_string());
    }

    pub fn set_own_input_size(&self, size: usize) {
        set(&self.own_input_size, size);
    }

    pub fn set_partner_extract_size(&self, size: usize) {
        set(&self.partner_extract_size, size);
    }

    pub fn set_intersection_size(&self, size: usize) {
        set(&self.intersection_size, size);
    }

    pub fn save_metrics(&self, path: &str) -> Result<(), std::io::Error> {
        self.cp_to_raw().save_metrics(path)
    }

    pub fn print_metrics(&self) {
        self.cp_to_raw().print_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_set_parameters() {
        let m = Metrics::new("dh-psi");
        assert_eq!(get(&m.own_input_size), None);
        m.set_own_input_size(4);
        m.set_partner_extract_size(5);
        m.set_intersection_size(3);
        m.set_request_id("abc");

        let r = m.cp_to_raw();
        assert_eq!(r.own_input_size, Some(4));
        assert_eq!(r.partner_extract_size, Some(5));
        assert_eq!(r.intersection_size, Some(3));
        assert_eq!(r.request_id.as_deref(), Some("abc"));

        m.set_intersection_size(1);
        assert_eq!(get(&m.intersection_size), Some(1));
    }

    #[test]
    fn test_metrics_save() {
        use std::io::Read;

        use tempfile::NamedTempFile;

        let m = Metrics::new("dh-psi");
        m.set_own_input_size(2);
        m.set_partner_extract_size(1);
        m.set_intersection_size(1);

        let mut file = NamedTempFile::new().unwrap();
        m.save_metrics(file.path().to_str().unwrap()).unwrap();
        m.print_metrics();
        let mut buf = String::new();
        file.read_to_string(&mut buf).unwrap();
        assert_eq!(
            buf,
            "{\"protocol_name\":\"dh-psi\",\"request_id\":null,\"own_input_size\":2,\"partner_extract_size\":1,\"intersection_size\":1}"
        );
    }
}
