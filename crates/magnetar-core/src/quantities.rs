use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Resource quantities for nodes and pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    pub fn new(cpu_millicores: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Parse a CPU quantity into millicores. Accepts whole cores ("2"),
    /// fractional cores ("0.5"), and the millicore form ("250m").
    pub fn parse_cpu(s: &str) -> Result<i64, String> {
        match s.strip_suffix('m') {
            Some(millis) => millis
                .parse::<i64>()
                .map_err(|e| format!("bad millicore quantity '{}': {}", s, e)),
            None => s
                .parse::<f64>()
                .map(|cores| (cores * 1000.0) as i64)
                .map_err(|e| format!("bad core quantity '{}': {}", s, e)),
        }
    }

    /// Parse a memory quantity into bytes. Understands the binary suffixes
    /// Ki, Mi, and Gi; a bare number is taken as bytes.
    pub fn parse_memory(s: &str) -> Result<i64, String> {
        let (digits, multiplier) = match s.find(|c: char| !c.is_ascii_digit()) {
            None => (s, 1_i64),
            Some(idx) => {
                let (digits, suffix) = s.split_at(idx);
                let multiplier = match suffix {
                    "Ki" => 1_i64 << 10,
                    "Mi" => 1_i64 << 20,
                    "Gi" => 1_i64 << 30,
                    other => {
                        return Err(format!("unknown memory suffix '{}' in '{}'", other, s))
                    }
                };
                (digits, multiplier)
            }
        };

        digits
            .parse::<i64>()
            .map(|n| n * multiplier)
            .map_err(|e| format!("bad memory quantity '{}': {}", s, e))
    }

    /// Get CPU and memory from a resource map (k8s-openapi format).
    /// Unparseable or absent entries contribute 0.
    pub fn from_quantity_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Component-wise sum
    pub fn add(&self, other: &Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores + other.cpu_millicores,
            memory_bytes: self.memory_bytes + other.memory_bytes,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_bytes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(ResourceQuantities::parse_cpu("1").unwrap(), 1000);
        assert_eq!(ResourceQuantities::parse_cpu("0.5").unwrap(), 500);
        assert_eq!(ResourceQuantities::parse_cpu("100m").unwrap(), 100);
        assert_eq!(ResourceQuantities::parse_cpu("2").unwrap(), 2000);
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(ResourceQuantities::parse_memory("1024").unwrap(), 1024);
        assert_eq!(ResourceQuantities::parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(
            ResourceQuantities::parse_memory("128Mi").unwrap(),
            128 * 1024 * 1024
        );
        assert_eq!(
            ResourceQuantities::parse_memory("1Gi").unwrap(),
            1024 * 1024 * 1024
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ResourceQuantities::parse_cpu("lots").is_err());
        assert!(ResourceQuantities::parse_cpu("xm").is_err());
        assert!(ResourceQuantities::parse_memory("128Zi").is_err());
        assert!(ResourceQuantities::parse_memory("many").is_err());
    }

    #[test]
    fn test_from_quantity_map() {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), Quantity("500m".to_string()));
        map.insert("memory".to_string(), Quantity("1Gi".to_string()));

        let q = ResourceQuantities::from_quantity_map(&map);
        assert_eq!(q.cpu_millicores, 500);
        assert_eq!(q.memory_bytes, 1024 * 1024 * 1024);

        // Absent entries contribute 0
        let empty = ResourceQuantities::from_quantity_map(&BTreeMap::new());
        assert!(empty.is_zero());
    }

    #[test]
    fn test_add() {
        let a = ResourceQuantities::new(100, 1024);
        let b = ResourceQuantities::new(200, 2048);
        let sum = a.add(&b);
        assert_eq!(sum.cpu_millicores, 300);
        assert_eq!(sum.memory_bytes, 3072);
    }
}
