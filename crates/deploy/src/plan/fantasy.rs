//! The fantasy sports prediction market deployment.

use crate::{
    ContractArg, DeployConfig, DeployError,
    args::role_id,
    plan::{ComponentSpec, HookSpec, Plan},
};

pub const SPORTS_ORACLE: &str = "SportsOracle";
pub const FANTASY_TOKEN: &str = "FantasyToken";
pub const MARKET_FACTORY: &str = "MarketFactory";
pub const PREDICTION_MARKET: &str = "FantasyPredictionMarket";
pub const TIMELOCK: &str = "TimelockController";
pub const GOVERNANCE_TOKEN: &str = "GovernanceToken";
pub const GOVERNOR: &str = "Governor";

/// Role granted to the deployer on the oracle so it can post results.
pub const ORACLE_ROLE: &str = "ORACLE_ROLE";

/// Win/loss market type of the sample market.
const SAMPLE_MARKET_TYPE: u64 = 1;
const SAMPLE_GAME_DELAY_SECS: u64 = 86_400;

/// Build the plan for the prediction market and its governance.
///
/// Validates `config` first; invalid configuration is a [`DeployError::Configuration`].
pub fn fantasy_plan(config: &DeployConfig) -> Result<Plan, DeployError> {
    config.validate()?;

    let idempotent = |owner: &str, hook: HookSpec| {
        let retry = config.is_idempotent_hook(owner, &hook.target, &hook.method);
        hook.idempotent(retry)
    };

    let oracle = match config.oracle_address_override {
        Some(address) => ComponentSpec::new(SPORTS_ORACLE, "SportsOracle").external(address),
        None => ComponentSpec::new(SPORTS_ORACLE, "SportsOracle").hook(idempotent(
            SPORTS_ORACLE,
            HookSpec::new(SPORTS_ORACLE, "grantRole(bytes32,address)", |ctx| {
                Ok(vec![role_id(ORACLE_ROLE).into(), ctx.deployer()?.into()])
            }),
        )),
    };

    let (token_name, token_symbol, initial_supply) = (
        config.token_name.clone(),
        config.token_symbol.clone(),
        config.initial_supply,
    );
    let token = ComponentSpec::new(FANTASY_TOKEN, "FantasyToken").args(move |_| {
        Ok(vec![
            token_name.as_str().into(),
            token_symbol.as_str().into(),
            initial_supply.into(),
        ])
    });

    let fee = config.platform_fee_basis_points;
    let factory = ComponentSpec::new(MARKET_FACTORY, "FantasyMarketFactory")
        .depends_on([SPORTS_ORACLE])
        .args(move |ctx| Ok(vec![ctx.address(SPORTS_ORACLE)?.into(), fee.into()]));

    let (min_bet, max_bet, reward) = (
        config.min_bet_amount,
        config.max_bet_amount,
        config.reward_amount,
    );
    let mut market = ComponentSpec::new(PREDICTION_MARKET, "FantasyPredictionMarket")
        .depends_on([SPORTS_ORACLE, MARKET_FACTORY, FANTASY_TOKEN])
        .args(move |ctx| {
            Ok(vec![
                ctx.address(SPORTS_ORACLE)?.into(),
                ctx.address(MARKET_FACTORY)?.into(),
                ctx.address(FANTASY_TOKEN)?.into(),
                min_bet.into(),
                max_bet.into(),
                fee.into(),
            ])
        })
        .hook(idempotent(
            PREDICTION_MARKET,
            HookSpec::new(PREDICTION_MARKET, "setMarketFactory(address)", |ctx| {
                Ok(vec![ctx.address(MARKET_FACTORY)?.into()])
            }),
        ))
        .hook(idempotent(
            PREDICTION_MARKET,
            HookSpec::new(MARKET_FACTORY, "setMainContract(address)", |ctx| {
                Ok(vec![ctx.address(PREDICTION_MARKET)?.into()])
            }),
        ))
        .hook(idempotent(
            PREDICTION_MARKET,
            HookSpec::new(FANTASY_TOKEN, "transfer(address,uint256)", move |ctx| {
                Ok(vec![ctx.address(PREDICTION_MARKET)?.into(), reward.into()])
            }),
        ));

    if config.create_sample_market {
        let game_time = config
            .sample_market_game_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u64 + SAMPLE_GAME_DELAY_SECS);
        market = market.hook(idempotent(
            PREDICTION_MARKET,
            HookSpec::new(
                PREDICTION_MARKET,
                "createMarket(string,string,string,uint256,uint8,string[])",
                move |_| Ok(sample_market_args(game_time)),
            ),
        ));
    }

    let min_delay = config.min_delay_seconds;
    let timelock = ComponentSpec::new(TIMELOCK, "TimelockController").args(move |ctx| {
        let deployer = ctx.deployer()?;
        Ok(vec![
            min_delay.into(),
            ContractArg::addresses([deployer]),
            ContractArg::addresses([deployer]),
            deployer.into(),
        ])
    });

    let governance_token = ComponentSpec::new(GOVERNANCE_TOKEN, "GovernanceToken");

    let governor = ComponentSpec::new(GOVERNOR, "FantasyGovernor")
        .depends_on([GOVERNANCE_TOKEN, TIMELOCK])
        .args(|ctx| {
            Ok(vec![
                ctx.address(GOVERNANCE_TOKEN)?.into(),
                ctx.address(TIMELOCK)?.into(),
            ])
        });

    let components = vec![
        oracle,
        token,
        factory,
        market,
        timelock,
        governance_token,
        governor,
    ];

    if let Some(entry) = config.unmatched_idempotent_hook(&components) {
        return Err(DeployError::Configuration(format!(
            "idempotent hook `{entry}` does not name any hook of the plan"
        )));
    }

    Plan::new(components)
}

/// Arguments of the sample NFL market.
fn sample_market_args(game_time: u64) -> Vec<ContractArg> {
    vec![
        "NFL_2024_WEEK1_KC_VS_BAL".into(),
        "Kansas City Chiefs".into(),
        "Baltimore Ravens".into(),
        game_time.into(),
        SAMPLE_MARKET_TYPE.into(),
        ContractArg::strings(["Chiefs Win", "Ravens Win"]),
    ]
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, U256};

    use super::*;
    use crate::{ResolutionContext, context::DeployedComponent};

    fn names(plan: &Plan) -> Vec<&str> {
        plan.ordered().map(|c| c.name.as_str()).collect()
    }

    fn resolved(ctx: &mut ResolutionContext, name: &str, byte: u8) {
        ctx.record(
            name,
            DeployedComponent {
                contract: name.to_string(),
                address: Address::with_last_byte(byte),
                block_number: Some(1),
                tx_hash: None,
                constructor_args: vec![],
                external: false,
            },
        );
    }

    #[test]
    fn test_default_order_follows_declaration() {
        let plan = fantasy_plan(&DeployConfig::default()).unwrap();
        assert_eq!(
            names(&plan),
            vec![
                SPORTS_ORACLE,
                FANTASY_TOKEN,
                MARKET_FACTORY,
                PREDICTION_MARKET,
                TIMELOCK,
                GOVERNANCE_TOKEN,
                GOVERNOR
            ]
        );
    }

    #[test]
    fn test_market_hooks() {
        let plan = fantasy_plan(&DeployConfig::default()).unwrap();
        let market = plan.get(PREDICTION_MARKET).unwrap();
        let hooks: Vec<(&str, &str)> = market
            .hooks
            .iter()
            .map(|h| (h.target.as_str(), h.method.as_str()))
            .collect();
        assert_eq!(
            hooks,
            vec![
                (PREDICTION_MARKET, "setMarketFactory(address)"),
                (MARKET_FACTORY, "setMainContract(address)"),
                (FANTASY_TOKEN, "transfer(address,uint256)"),
            ]
        );
        assert!(market.hooks.iter().all(|h| !h.idempotent));
    }

    #[test]
    fn test_market_args_reference_dependencies() {
        let config = DeployConfig::default();
        let plan = fantasy_plan(&config).unwrap();
        let market = plan.get(PREDICTION_MARKET).unwrap();

        let mut ctx = ResolutionContext::new();
        resolved(&mut ctx, SPORTS_ORACLE, 1);
        resolved(&mut ctx, FANTASY_TOKEN, 2);
        assert!((market.args)(&ctx).is_err());

        resolved(&mut ctx, MARKET_FACTORY, 3);
        let args = (market.args)(&ctx).unwrap();
        assert_eq!(args[0], ContractArg::Address(Address::with_last_byte(1)));
        assert_eq!(args[1], ContractArg::Address(Address::with_last_byte(3)));
        assert_eq!(args[2], ContractArg::Address(Address::with_last_byte(2)));
        assert_eq!(args[3], ContractArg::Uint(config.min_bet_amount));
        assert_eq!(args[5], ContractArg::Uint(U256::from(250u64)));
    }

    #[test]
    fn test_timelock_uses_deployer() {
        let plan = fantasy_plan(&DeployConfig::default()).unwrap();
        let timelock = plan.get(TIMELOCK).unwrap();
        let deployer = Address::with_last_byte(0xaa);

        let mut ctx = ResolutionContext::new();
        assert!((timelock.args)(&ctx).is_err());
        ctx.set_deployer(deployer);

        let args = (timelock.args)(&ctx).unwrap();
        assert_eq!(args[0], ContractArg::from(86_400u64));
        assert_eq!(args[1], ContractArg::addresses([deployer]));
        assert_eq!(args[3], ContractArg::Address(deployer));
    }

    #[test]
    fn test_oracle_override_is_external() {
        let address = Address::with_last_byte(0x99);
        let config = DeployConfig {
            oracle_address_override: Some(address),
            ..Default::default()
        };
        let plan = fantasy_plan(&config).unwrap();
        let oracle = plan.get(SPORTS_ORACLE).unwrap();
        assert_eq!(oracle.external, Some(address));
        assert!(oracle.hooks.is_empty());
    }

    #[test]
    fn test_sample_market_and_idempotent_marking() {
        let config = DeployConfig {
            create_sample_market: true,
            sample_market_game_time: Some(1_700_000_000),
            idempotent_hooks: vec!["FantasyPredictionMarket.setMarketFactory".to_string()],
            ..Default::default()
        };
        let plan = fantasy_plan(&config).unwrap();
        let market = plan.get(PREDICTION_MARKET).unwrap();
        assert_eq!(market.hooks.len(), 4);
        assert!(market.hooks[0].idempotent);
        assert!(!market.hooks[1].idempotent);

        let sample = &market.hooks[3];
        let args = (sample.args)(&ResolutionContext::new()).unwrap();
        assert_eq!(args[3], ContractArg::from(1_700_000_000u64));
        assert_eq!(args[5], ContractArg::strings(["Chiefs Win", "Ravens Win"]));
    }

    #[test]
    fn test_idempotent_hooks_named_by_target() {
        let config = DeployConfig {
            idempotent_hooks: vec![
                "MarketFactory.setMainContract".to_string(),
                "FantasyToken.transfer(address,uint256)".to_string(),
            ],
            ..Default::default()
        };
        let plan = fantasy_plan(&config).unwrap();
        let market = plan.get(PREDICTION_MARKET).unwrap();
        let flags: Vec<bool> = market.hooks.iter().map(|h| h.idempotent).collect();
        assert_eq!(flags, vec![false, true, true]);
    }

    #[test]
    fn test_unknown_idempotent_hook_fails_plan() {
        let config = DeployConfig {
            idempotent_hooks: vec!["FantasyToken.mint".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            fantasy_plan(&config),
            Err(DeployError::Configuration(msg)) if msg.contains("FantasyToken.mint")
        ));

        // The oracle hook only exists when the oracle is deployed.
        let config = DeployConfig {
            oracle_address_override: Some(Address::with_last_byte(0x99)),
            idempotent_hooks: vec!["SportsOracle.grantRole".to_string()],
            ..Default::default()
        };
        assert!(fantasy_plan(&config).is_err());
    }

    #[test]
    fn test_invalid_config_fails_plan() {
        let config = DeployConfig {
            platform_fee_basis_points: 20_000,
            ..Default::default()
        };
        assert!(matches!(
            fantasy_plan(&config),
            Err(DeployError::Configuration(_))
        ));
    }
}
