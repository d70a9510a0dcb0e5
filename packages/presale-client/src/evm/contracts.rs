//! Presale, staking and token contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. Only the entry
//! points the client calls are declared.

use alloy::sol;

sol! {
    /// Crowdsale contract selling the token for ETH
    #[sol(rpc)]
    contract Crowdsale {
        /// Aggregate sale state plus the caller-supplied account's position.
        /// `timeNow` is the block timestamp of the read.
        function getStates(address beneficiary) external view returns (
            uint256 ethRaised,
            uint256 timeOpen,
            uint256 timeClose,
            uint256 timeNow,
            uint256 userEthInvested,
            uint256 userTokenAmount
        );

        /// Buy tokens for msg.value
        function buyTokens(address beneficiary) external payable;

        /// Buy tokens and add the matching liquidity for msg.value
        function buyTokensAddLiquidity(address beneficiary) external payable;

        event TokensPurchased(
            address indexed purchaser,
            address indexed beneficiary,
            uint256 value,
            uint256 amount
        );

        event Staked(address indexed user, uint256 amount);
    }

    /// Uniswap V2 LP stake farm
    #[sol(rpc)]
    contract StakeFarm {
        /// Positional UI figures:
        /// [poolSupply, reserve0, reserve1, priceReserve0, stakeSupply,
        ///  stakeSupplyUser, rewardsDuration, rewardPerDuration, earned]
        function getUIData(address account) external view returns (uint256[9] memory);
    }

    /// Sale token (ERC20 subset)
    #[sol(rpc)]
    contract Token {
        function balanceOf(address account) external view returns (uint256);
    }
}
