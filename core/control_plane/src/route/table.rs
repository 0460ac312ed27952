//! Persistent route table
//!
//! A plain sorted sequence with linear containment matching. The table has
//! no locking of its own; [`Route`](super::Route) serialises access.

use ipnet::IpNet;

use super::Item;

/// Persistent entries, kept sorted by canonical CIDR string
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    items: Vec<Item>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert without any overlap check
    pub fn append(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Order by canonical CIDR string, ascending
    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| a.cidr().cmp(b.cidr()));
    }

    /// First entry (in current order) that contains or is contained by
    /// `target`. This is not longest-prefix selection.
    pub fn match_net(&self, target: &IpNet) -> Option<&Item> {
        self.items.iter().find(|item| item.matches(target))
    }

    /// Remove the entry whose canonical CIDR equals `cidr`
    pub fn remove(&mut self, cidr: &str) -> Option<Item> {
        let idx = self.items.iter().position(|item| item.cidr() == cidr)?;
        Some(self.items.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(cidr: &str) -> Item {
        Item::parse(cidr, "").unwrap()
    }

    #[test]
    fn test_sort_by_cidr_string() {
        let mut table = RouteTable::new();
        table.append(item("192.168.0.0/16"));
        table.append(item("10.0.0.0/8"));
        table.append(item("172.16.0.0/12"));
        table.sort();

        let cidrs: Vec<&str> = table.iter().map(|i| i.cidr()).collect();
        assert_eq!(cidrs, vec!["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]);
    }

    #[test]
    fn test_match_first_in_sorted_order() {
        // Overlapping entries only exist if a caller skips the overlap check
        let mut table = RouteTable::new();
        table.append(item("10.1.0.0/16"));
        table.append(item("10.0.0.0/8"));
        table.sort();

        let hit = table.match_net(&"10.1.2.0/24".parse().unwrap()).unwrap();
        assert_eq!(hit.cidr(), "10.0.0.0/8");
    }

    #[test]
    fn test_match_wider_query() {
        let mut table = RouteTable::new();
        table.append(item("10.1.0.0/16"));

        assert!(table.match_net(&"10.0.0.0/8".parse().unwrap()).is_some());
        assert!(table.match_net(&"11.0.0.0/8".parse().unwrap()).is_none());
    }

    #[test]
    fn test_remove_exact_only() {
        let mut table = RouteTable::new();
        table.append(item("10.0.0.0/8"));

        assert!(table.remove("10.0.0.0/16").is_none());
        assert_eq!(table.remove("10.0.0.0/8").unwrap().cidr(), "10.0.0.0/8");
        assert!(table.is_empty());
    }
}
