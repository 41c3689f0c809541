//! Destination-chain wrapped-asset contract ABI definition
//!
//! Mint/burn authority on the pegged representation. `mint` is the
//! authority-gated call the relayer submits for a confirmed Locked event;
//! `Burned` events drive the reverse (release) flow.

use alloy::sol;

sol! {
    /// Wrapped-asset mint/burn contract on the destination chain.
    #[sol(rpc)]
    contract WrappedToken {
        /// Mint pegged tokens to a user. Bridge-authority-only. Emits Minted.
        function mint(address token, address user, uint256 amount) external;

        /// Burn pegged tokens from a user to start the reverse flow.
        /// Bridge-authority-only. Emits Burned.
        function burn(address token, address user, uint256 amount) external;

        /// Events
        event Minted(
            address indexed token,
            address indexed user,
            uint256 amount
        );

        event Burned(
            address indexed token,
            address indexed user,
            uint256 amount
        );
    }
}
