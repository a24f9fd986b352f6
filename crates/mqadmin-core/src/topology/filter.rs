use crate::model::DestinationInfo;

/// Destination the broker's admin service talks over.
pub const ADMIN_DESTINATION: &str = "__JMQAdmin";
/// Destination used by the bridge service for its own administration.
pub const BRIDGE_ADMIN_DESTINATION: &str = "__JMQBridgeAdmin";

/// Whether a destination belongs in the console's destination list.
///
/// Temporary destinations, broker-internal ones and the two admin
/// destinations are never shown.
pub fn is_listed(info: &DestinationInfo) -> bool {
    !info.temporary
        && !info.internal
        && info.name != ADMIN_DESTINATION
        && info.name != BRIDGE_ADMIN_DESTINATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DestType;

    #[test]
    fn only_ordinary_destinations_are_listed() {
        let mut temporary = DestinationInfo::new("temporary_destination://queue/1", DestType::Queue);
        temporary.temporary = true;
        let mut internal = DestinationInfo::new("mq.sys.dmq", DestType::Queue);
        internal.internal = true;
        let admin = DestinationInfo::new(ADMIN_DESTINATION, DestType::Topic);
        let bridge = DestinationInfo::new(BRIDGE_ADMIN_DESTINATION, DestType::Queue);
        let orders = DestinationInfo::new("orders", DestType::Queue);

        let listed: Vec<_> = [temporary, internal, admin, bridge, orders.clone()]
            .into_iter()
            .filter(is_listed)
            .collect();
        assert_eq!(listed, vec![orders]);
    }
}
