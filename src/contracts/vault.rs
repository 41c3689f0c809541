//! Source-chain vault contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the lock/release
//! ledger contract. The relayer is a pure consumer of its events and the sole
//! caller of the authority-gated `release` entry point.

use alloy::sol;

sol! {
    /// Lock/unlock ledger on the source chain.
    #[sol(rpc)]
    contract BridgeVault {
        /// Lock tokens for bridging. Emits Locked.
        function lock(address token, uint256 amount) external;

        /// Release previously locked tokens to a user. Authority-only;
        /// called by the relayer after observing a finalized Burned event
        /// on the destination chain. Emits Released.
        function release(address token, address user, uint256 amount) external;

        /// Amount currently held by the vault for (token, user).
        function lockedBalanceOf(address token, address user) external view returns (uint256);

        /// Total vault holdings for a token across all users.
        /// Read-only projection used by the reconciliation task.
        function totalLocked(address token) external view returns (uint256);

        /// Events
        event Locked(
            address indexed token,
            address indexed user,
            uint256 amount
        );

        event Released(
            address indexed token,
            address indexed user,
            uint256 amount
        );
    }
}
