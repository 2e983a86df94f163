//! Contract interface: the four lifecycle events and the three read
//! functions this crate depends on.
//!
//! Defined inline rather than loaded from a JSON artifact — there is no
//! separate ABI file to keep in sync, and the shapes are small enough that
//! the interface itself is the documentation.

#[allow(clippy::too_many_arguments)]
pub mod exchange {
    alloy::sol! {
        #[derive(Debug)]
        #[sol(rpc)]
        interface Exchange {
            event Opened(uint32 id, uint8 state, uint32 asset, bool longSide, uint16 lots, int64 entryOrTargetX6, int64 slX6, int64 tpX6, int64 liqX6, address trader, uint16 leverageX);
            event Executed(uint32 id, int64 entryX6);
            event StopsUpdated(uint32 id, int64 slX6, int64 tpX6);
            event Removed(uint32 id, uint8 reason, int64 execX6, int256 pnlUsd6);

            // `flags` bit 0 encodes long_side; there is no separate bool
            // field, unlike the decoded event shapes above.
            struct Trade {
                address owner;
                uint32 asset;
                uint8 flags;
                uint8 state;
                uint16 lots;
                uint16 leverageX;
                int64 entryX6;
                int64 targetX6;
                int64 slX6;
                int64 tpX6;
                int64 liqX6;
            }

            function getTrade(uint32 id) external view returns (Trade memory);
            function stateOf(uint32 id) external view returns (uint8);
            function nextId() external view returns (uint32);
        }
    }
}
